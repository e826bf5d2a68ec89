//! Shared data model for the task response and fraud-challenge writer.
//!
//! Everything here is plain data: identifiers, ordering tokens, operator
//! sets, tasks and the responses produced for them. Behaviour lives in the
//! crates that own each component.

pub mod error;
pub mod ids;
pub mod keys;
pub mod operator;
pub mod task;

pub use error::{Result, TypesError};
pub use ids::{Address, BlockNumber, QuorumBitmap, QuorumNumber, TaskIndex, TxHash};
pub use keys::{BlsPublicKey, BlsSignature, BlsSignatureShare};
pub use operator::{OperatorInfo, OperatorSet, Stake};
pub use task::{
    hash_non_signers, AggregatedResponse, NonSignerStakesAndSignature, PartialSignature, Task,
    TaskResponse, TaskResponseMetadata,
};
