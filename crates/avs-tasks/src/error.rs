use crate::TaskState;
use avs_aggregator::AggregationError;
use avs_challenges::ChallengeError;
use avs_ledger::LedgerError;
use avs_registry::RegistryError;
use avs_types::{BlockNumber, TaskIndex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Unknown task: {0}")]
    UnknownTask(TaskIndex),

    #[error("Invalid transition for task {task_index}: {from:?} -> {to:?}")]
    InvalidTransition {
        task_index: TaskIndex,
        from: TaskState,
        to: TaskState,
    },

    #[error("Task {task_index} is not collecting shares (state {state:?})")]
    NotCollecting {
        task_index: TaskIndex,
        state: TaskState,
    },

    #[error("Response deadline {deadline} for task {task_index} passed (head {head})")]
    DeadlinePassed {
        task_index: TaskIndex,
        deadline: BlockNumber,
        head: BlockNumber,
    },

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Aggregation error: {0}")]
    Aggregation(#[from] AggregationError),

    #[error("Challenge error: {0}")]
    Challenge(#[from] ChallengeError),

    #[error("Task store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TaskError>;
