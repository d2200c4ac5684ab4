//! Callback authentication and decryption.

pub mod codec;
pub mod lark;
pub mod signature;

use thiserror::Error;

pub use codec::TencentCodec;
pub use lark::LarkCipher;

/// Codec failures. The detail is for logs only; callers answer with a
/// generic 500 so the remote side learns nothing about why it failed.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid encoding key: {0}")]
    InvalidKey(String),

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
}
