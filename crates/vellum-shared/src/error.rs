use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Malformed encrypted blob: {0}")]
    MalformedBlob(String),

    #[error("Malformed password artifact: {0}")]
    MalformedArtifact(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),
}

impl CryptoError {
    /// Whether the failure comes from the shape of stored data rather than
    /// from the key that was tried.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            CryptoError::MalformedBlob(_) | CryptoError::MalformedArtifact(_)
        )
    }
}
