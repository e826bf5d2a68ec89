use avs_ledger::LedgerError;
use avs_types::{BlockNumber, TaskIndex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChallengeError {
    #[error("Challenge window for task {task_index} closed at {deadline} (head {head})")]
    WindowClosed {
        task_index: TaskIndex,
        deadline: BlockNumber,
        head: BlockNumber,
    },

    #[error("Challenge window not found: task {0}")]
    WindowNotFound(TaskIndex),

    #[error("Challenge window for task {0} has not expired yet")]
    WindowNotExpired(TaskIndex),

    #[error("Task {0} has already been challenged")]
    DuplicateChallenge(TaskIndex),

    #[error("Challenge window not in active state: {0}")]
    NotActive(String),

    #[error("Task {0} has no recorded response to challenge")]
    NotResponded(TaskIndex),

    #[error("Recorded response for task {0} matches the recomputed answer")]
    NothingToChallenge(TaskIndex),

    #[error("Aggregated response for task {0} differs from the recorded one")]
    ResponseMismatch(TaskIndex),

    #[error("Invalid task input: {0}")]
    InvalidInput(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl ChallengeError {
    /// Errors caused by the data being challenged rather than by the ledger.
    pub fn is_protocol_violation(&self) -> bool {
        match self {
            ChallengeError::Ledger(err) => err.class() == avs_ledger::ErrorClass::ProtocolViolation,
            ChallengeError::WindowClosed { .. } => false,
            _ => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, ChallengeError>;
