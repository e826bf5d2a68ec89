//! Fraud challenges against recorded task responses.
//!
//! The [`ChallengeVerifier`] recomputes each recorded answer with a pure
//! [`Computation`] and, when the answer is wrong, raises a challenge through
//! the ledger writer before the task's challenge deadline. Per-task windows
//! are tracked by the [`ChallengeWindowManager`].

pub mod computation;
pub mod error;
pub mod types;
pub mod verifier;
pub mod window;

pub use computation::{Computation, Squaring};
pub use error::{ChallengeError, Result};
pub use types::{
    ChallengeConfig, ChallengeOutcome, ChallengeRecord, ChallengeRecordStatus, ChallengeStatus,
    ChallengeWindow, Verdict,
};
pub use verifier::ChallengeVerifier;
pub use window::ChallengeWindowManager;
