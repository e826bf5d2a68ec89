//! Task lifecycle controller.
//!
//! Drives each task from dispatch through share collection, aggregation,
//! response submission and the challenge window, persisting every
//! transition so a restarted node can reconcile its records against the
//! ledger.

pub mod controller;
pub mod error;
pub mod state;
pub mod store;

pub use controller::{ControllerConfig, TaskController};
pub use error::{Result, TaskError};
pub use state::{Disposition, FailureClass, TaskEvent, TaskFailure, TaskRecord, TaskState};
pub use store::{FileTaskStore, MemoryTaskStore, TaskStore};
