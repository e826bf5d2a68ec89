use avs_challenges::ChallengeRecord;
use avs_ledger::ErrorClass;
use avs_types::{AggregatedResponse, Stake, Task, TaskIndex, TxHash};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a task owned by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    Created,
    /// Accepting operator shares until quorum or the response deadline.
    Collecting,
    Aggregating,
    /// Aggregated response built, ledger submission outstanding.
    Submitting,
    AwaitingChallengeWindow,
    Final,
    Challenged,
    Abandoned,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Final | Self::Challenged | Self::Abandoned)
    }

    pub fn can_transition_to(&self, next: &Self) -> bool {
        use TaskState::*;
        match (self, next) {
            (Created, Collecting) => true,
            (Created, Abandoned) => true,

            (Collecting, Aggregating) => true,
            (Collecting, Abandoned) => true, // no shares by the deadline

            (Aggregating, Submitting) => true,
            (Aggregating, Abandoned) => true,

            (Submitting, AwaitingChallengeWindow) => true,
            (Submitting, Abandoned) => true,

            (AwaitingChallengeWindow, Final) => true,
            (AwaitingChallengeWindow, Challenged) => true,

            _ => false,
        }
    }
}

/// Serializable mirror of [`ErrorClass`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureClass {
    Transient,
    Stale,
    ProtocolViolation,
    Fatal,
}

impl From<ErrorClass> for FailureClass {
    fn from(class: ErrorClass) -> Self {
        match class {
            ErrorClass::Transient => FailureClass::Transient,
            ErrorClass::Stale => FailureClass::Stale,
            ErrorClass::ProtocolViolation => FailureClass::ProtocolViolation,
            ErrorClass::Fatal => FailureClass::Fatal,
        }
    }
}

/// Why a task stopped short of a recorded response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskFailure {
    NoShares,
    InsufficientQuorum {
        signed_stake: Stake,
        total_stake: Stake,
        threshold_percentage: u8,
    },
    Aggregation {
        reason: String,
    },
    Submission {
        class: FailureClass,
        reason: String,
    },
    MissingOnLedger,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub from: TaskState,
    pub to: TaskState,
    pub at: DateTime<Utc>,
}

/// Everything the controller knows about one task. Persisted on every
/// transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task: Task,
    pub state: TaskState,
    pub aggregated: Option<AggregatedResponse>,
    pub response_tx: Option<TxHash>,
    pub challenge: Option<ChallengeRecord>,
    pub failure: Option<TaskFailure>,
    /// Last error from a submission attempt that left the task retryable.
    pub last_error: Option<String>,
    pub submission_attempts: u32,
    /// Shares refused for this task, as protocol violation descriptions.
    pub rejected_shares: Vec<String>,
    pub response_checked: bool,
    pub history: Vec<StateChange>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn new(task: Task) -> Self {
        let now = Utc::now();
        Self {
            task,
            state: TaskState::Created,
            aggregated: None,
            response_tx: None,
            challenge: None,
            failure: None,
            last_error: None,
            submission_attempts: 0,
            rejected_shares: Vec::new(),
            response_checked: false,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn index(&self) -> TaskIndex {
        self.task.index
    }

    pub fn disposition(&self) -> Disposition {
        Disposition {
            task_index: self.task.index,
            state: self.state,
            failure: self.failure.clone(),
            challenge: self.challenge.clone(),
            response_tx: self.response_tx,
        }
    }
}

/// Where a task ended up, or currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disposition {
    pub task_index: TaskIndex,
    pub state: TaskState,
    pub failure: Option<TaskFailure>,
    pub challenge: Option<ChallengeRecord>,
    pub response_tx: Option<TxHash>,
}

/// Emitted after every successful transition.
#[derive(Debug, Clone)]
pub struct TaskEvent {
    pub task_index: TaskIndex,
    pub from: TaskState,
    pub to: TaskState,
    pub timestamp: DateTime<Utc>,
}
