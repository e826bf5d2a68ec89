//! BLS threshold signatures over task response digests.
//!
//! Every operator holds one secret key share of a group key set produced by
//! an external key ceremony. Shares are verified individually against the
//! operator's registered public key share. The shares of a signer set are
//! aggregated by point addition, so the aggregate verifies only against the
//! sum of exactly those signers' public keys.
//!
//! # Domain Separation
//!
//! All signatures are taken over `DST || message`:
//! - `AVS-TASK-RESPONSE-v1`: task responses

pub mod bls;
pub mod error;

pub use bls::{
    generate_threshold_keys, GroupPublicKey, OperatorKeyShare, ThresholdConfig, ThresholdSigner,
};
pub use error::{CryptoError, Result};

/// Domain separation tags.
pub mod dst {
    pub const TASK_RESPONSE: &[u8] = b"AVS-TASK-RESPONSE-v1";
    pub const CHALLENGE: &[u8] = b"AVS-CHALLENGE-v1";
}
