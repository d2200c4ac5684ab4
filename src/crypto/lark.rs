//! Decryption of Lark event bodies (`{"encrypt": "..."}`).
//!
//! Key is SHA-256 of the configured encrypt key; the first 16 bytes of the
//! decoded ciphertext are the IV.

use aes::Aes256;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use sha2::{Digest, Sha256};

use super::CodecError;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

const IV_LEN: usize = 16;

#[derive(Clone)]
pub struct LarkCipher {
    key: [u8; 32],
}

impl std::fmt::Debug for LarkCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LarkCipher").finish_non_exhaustive()
    }
}

impl LarkCipher {
    pub fn new(encrypt_key: &str) -> Self {
        let key: [u8; 32] = Sha256::digest(encrypt_key.as_bytes()).into();
        Self { key }
    }

    pub fn decrypt(&self, encrypted_b64: &str) -> Result<String, CodecError> {
        let raw = BASE64
            .decode(encrypted_b64.trim())
            .map_err(|e| CodecError::DecryptionFailed(format!("body is not base64: {}", e)))?;

        if raw.len() <= IV_LEN {
            return Err(CodecError::DecryptionFailed(format!(
                "ciphertext too short: {} bytes",
                raw.len()
            )));
        }

        let (iv, ciphertext) = raw.split_at(IV_LEN);
        let cipher = Aes256CbcDec::new(self.key.as_slice().into(), iv.into());
        let plaintext = cipher
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CodecError::DecryptionFailed("bad padding".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|_| CodecError::DecryptionFailed("plaintext is not UTF-8".to_string()))
    }

    /// Encrypt with a fresh random IV. Used to build test events.
    pub fn encrypt(&self, plaintext: &str) -> String {
        let iv: [u8; IV_LEN] = rand::random();
        let cipher = Aes256CbcEnc::new(self.key.as_slice().into(), iv.as_slice().into());
        let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

        let mut out = Vec::with_capacity(IV_LEN + ciphertext.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);
        BASE64.encode(out)
    }
}
