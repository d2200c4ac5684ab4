//! AES-256-CBC codec for Tencent Meeting callbacks.
//!
//! The configured `EncodingAESKey` is base64 without its trailing padding.
//! It is padded with `=` before decoding to the 32-byte key, and the IV is
//! the first 16 bytes of that key (it is never transmitted).

use aes::Aes256;
use base64::{
    alphabet,
    engine::{general_purpose::STANDARD as BASE64, DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine,
};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use super::CodecError;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Lenient decoder for the configured key: random keys rarely end on
/// canonical trailing bits.
const KEY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;

#[derive(Clone)]
pub struct TencentCodec {
    key: [u8; KEY_LEN],
}

impl std::fmt::Debug for TencentCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TencentCodec").finish_non_exhaustive()
    }
}

impl TencentCodec {
    pub fn from_encoding_key(encoding_key: &str) -> Result<Self, CodecError> {
        let key = decode_encoding_key(encoding_key)?;
        Ok(Self { key })
    }

    fn iv(&self) -> &[u8] {
        &self.key[..IV_LEN]
    }

    pub fn encrypt(&self, plaintext: &str) -> String {
        let cipher = Aes256CbcEnc::new(self.key.as_slice().into(), self.iv().into());
        let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
        BASE64.encode(ciphertext)
    }

    pub fn decrypt(&self, ciphertext_b64: &str) -> Result<String, CodecError> {
        let ciphertext = BASE64
            .decode(ciphertext_b64.trim())
            .map_err(|e| CodecError::DecryptionFailed(format!("ciphertext is not base64: {}", e)))?;

        let cipher = Aes256CbcDec::new(self.key.as_slice().into(), self.iv().into());
        let plaintext = cipher
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| CodecError::DecryptionFailed("bad padding".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|_| CodecError::DecryptionFailed("plaintext is not UTF-8".to_string()))
    }
}

/// Right-pad the key with `=` and decode it to the raw 32-byte key.
fn decode_encoding_key(encoding_key: &str) -> Result<[u8; KEY_LEN], CodecError> {
    let mut padded = encoding_key.trim().to_string();
    while padded.len() % 4 != 0 {
        padded.push('=');
    }

    let raw = KEY_ENGINE
        .decode(&padded)
        .map_err(|e| CodecError::InvalidKey(format!("key is not base64: {}", e)))?;

    raw.try_into().map_err(|raw: Vec<u8>| {
        CodecError::InvalidKey(format!("expected {} key bytes, got {}", KEY_LEN, raw.len()))
    })
}

/// Decrypt a callback body with the configured encoding key.
pub fn decrypt(ciphertext_b64: &str, encoding_key: &str) -> Result<String, CodecError> {
    TencentCodec::from_encoding_key(encoding_key)?.decrypt(ciphertext_b64)
}

/// Encrypt a payload the way the platform does. Used to build test events.
pub fn encrypt(plaintext: &str, encoding_key: &str) -> Result<String, CodecError> {
    Ok(TencentCodec::from_encoding_key(encoding_key)?.encrypt(plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;

    // base64("0123456789abcdef0123456789abcdef") without the trailing '='
    const KEY: &str = "MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY";

    #[test]
    fn test_key_is_padded_before_decoding() {
        let codec = TencentCodec::from_encoding_key(KEY).unwrap();
        assert_eq!(&codec.key, b"0123456789abcdef0123456789abcdef");
        assert_eq!(codec.iv(), b"0123456789abcdef");
    }

    #[test]
    fn test_round_trip_ascii() {
        let ciphertext = encrypt("{\"event\":\"meeting.started\"}", KEY).unwrap();
        let plaintext = decrypt(&ciphertext, KEY).unwrap();
        assert_eq!(plaintext, "{\"event\":\"meeting.started\"}");
    }

    #[test]
    fn test_round_trip_multibyte() {
        let original = "周会纪要：讨论了第三季度的路线图 🚀";
        let ciphertext = encrypt(original, KEY).unwrap();
        assert_eq!(decrypt(&ciphertext, KEY).unwrap(), original);
    }

    #[test]
    fn test_round_trip_empty() {
        let ciphertext = encrypt("", KEY).unwrap();
        assert_eq!(decrypt(&ciphertext, KEY).unwrap(), "");
    }

    #[test]
    fn test_malformed_base64_is_decryption_failure() {
        let err = decrypt("not base64 at all!!", KEY).unwrap_err();
        assert!(matches!(err, CodecError::DecryptionFailed(_)));
    }

    #[test]
    fn test_wrong_key_is_decryption_failure() {
        let ciphertext = encrypt("hello world, this is a test", KEY).unwrap();
        // base64("abcdefghijklmnopqrstuvwxyz012345")
        let other = "YWJjZGVmZ2hpamtsbW5vcHFyc3R1dnd4eXowMTIzNDU";
        let result = decrypt(&ciphertext, other);
        // A wrong key almost always breaks the padding; if it happens to
        // unpad cleanly the text still cannot match.
        match result {
            Err(CodecError::DecryptionFailed(_)) => {}
            Ok(text) => assert_ne!(text, "hello world, this is a test"),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_truncated_ciphertext_fails() {
        let ciphertext = encrypt("some payload", KEY).unwrap();
        let raw = BASE64.decode(&ciphertext).unwrap();
        let truncated = BASE64.encode(&raw[..raw.len() - 3]);
        assert!(matches!(
            decrypt(&truncated, KEY),
            Err(CodecError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_short_key_is_invalid() {
        let err = TencentCodec::from_encoding_key("c2hvcnQ").unwrap_err();
        assert!(matches!(err, CodecError::InvalidKey(_)));
    }
}
