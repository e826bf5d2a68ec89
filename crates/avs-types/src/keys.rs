//! Opaque encodings of BLS key material and signatures.
//!
//! The bytes are produced and interpreted by `avs-crypto`; this crate only
//! carries them around, compares them and renders them as hex.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An operator's BLS public key share together with its share index in the
/// group key set.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlsPublicKey {
    pub share_index: u64,
    bytes: Vec<u8>,
}

impl BlsPublicKey {
    pub fn new(share_index: u64, bytes: Vec<u8>) -> Self {
        Self { share_index, bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

impl fmt::Debug for BlsPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(
            f,
            "BlsPublicKey({}, {}...)",
            self.share_index,
            &hex[..hex.len().min(8)]
        )
    }
}

/// An aggregate BLS signature.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlsSignature(Vec<u8>);

impl BlsSignature {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Debug for BlsSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "BlsSignature({}...)", &hex[..hex.len().min(8)])
    }
}

/// One operator's signature share over a task response digest.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlsSignatureShare {
    pub share_index: u64,
    bytes: Vec<u8>,
}

impl BlsSignatureShare {
    pub fn new(share_index: u64, bytes: Vec<u8>) -> Self {
        Self { share_index, bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

impl fmt::Debug for BlsSignatureShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(
            f,
            "BlsSignatureShare({}, {}...)",
            self.share_index,
            &hex[..hex.len().min(8)]
        )
    }
}
