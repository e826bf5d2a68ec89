use avs_ledger::{ErrorClass, LedgerError};
use avs_types::Address;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum RegistryError {
    #[error("Operator {0} is not registered")]
    NotRegistered(Address),

    #[error("Operator {0} is already registered")]
    AlreadyRegistered(Address),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl RegistryError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RegistryError::NotRegistered(_) | RegistryError::AlreadyRegistered(_) => {
                ErrorClass::ProtocolViolation
            }
            RegistryError::Ledger(e) => e.class(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;
