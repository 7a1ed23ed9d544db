use crate::crypto::CryptoError;
use crate::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("card not found")]
    NotFound,

    #[error("wrong password")]
    WrongPassword,

    #[error("slot index {0} is outside 1..=35")]
    InvalidIndex(usize),

    #[error("expected 35 codes, got {0}")]
    InvalidCodes(usize),

    #[error(transparent)]
    StoreUnavailable(StoreError),

    #[error("card id '{0}' already exists")]
    DuplicateId(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl VaultError {
    /// Короткий код ошибки для ответов `serve`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::WrongPassword => "wrong_password",
            Self::InvalidIndex(_) => "invalid_index",
            Self::InvalidCodes(_) => "invalid_codes",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::DuplicateId(_) => "duplicate_id",
            Self::InvalidInput(_) | Self::Crypto(CryptoError::EmptyPassword) => "invalid_input",
            Self::Crypto(_) => "crypto",
        }
    }
}

impl From<StoreError> for VaultError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => Self::NotFound,
            StoreError::DuplicateId(id) => Self::DuplicateId(id),
            other => Self::StoreUnavailable(other),
        }
    }
}
