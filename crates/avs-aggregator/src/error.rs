use avs_crypto::CryptoError;
use avs_types::{Address, TaskIndex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AggregationError {
    #[error("Task {0} is not open for aggregation")]
    TaskNotOpen(TaskIndex),

    #[error("Operator {operator} is not in the operator set for task {task_index}")]
    UnknownOperator {
        task_index: TaskIndex,
        operator: Address,
    },

    #[error("Invalid signature share from {operator} for task {task_index}")]
    InvalidShare {
        task_index: TaskIndex,
        operator: Address,
    },

    #[error("Conflicting signature share from {operator} for task {task_index}")]
    ConflictingShare {
        task_index: TaskIndex,
        operator: Address,
    },

    #[error("Partial signature for task {actual} delivered to task {expected}")]
    MismatchedTask {
        expected: TaskIndex,
        actual: TaskIndex,
    },

    #[error("Signed stake overflow for task {0}")]
    StakeOverflow(TaskIndex),

    #[error("Signature aggregation failed: {0}")]
    Crypto(#[from] CryptoError),
}

impl AggregationError {
    /// Errors caused by what a peer sent rather than by local failure.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            AggregationError::UnknownOperator { .. }
                | AggregationError::InvalidShare { .. }
                | AggregationError::ConflictingShare { .. }
                | AggregationError::MismatchedTask { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, AggregationError>;
