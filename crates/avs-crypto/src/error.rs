use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid threshold: t={t} must be in 1..={n}")]
    InvalidThreshold { t: usize, n: usize },

    #[error("Cannot aggregate an empty signer set")]
    EmptySignerSet,

    #[error("Duplicate share for index {index}")]
    DuplicateShare { index: u64 },

    #[error("Share index {share} does not match public key index {key}")]
    IndexMismatch { share: u64, key: u64 },

    #[error("Aggregate signature failed verification against the signer keys")]
    VerificationFailed,

    #[error("Invalid curve point: {0}")]
    InvalidPoint(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;

impl From<bincode::Error> for CryptoError {
    fn from(e: bincode::Error) -> Self {
        CryptoError::Serialization(e.to_string())
    }
}
