use crate::{Result, TypesError};
use serde::{Deserialize, Serialize};
use std::fmt;

fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N]> {
    let bytes = hex::decode(s.trim_start_matches("0x"))?;
    if bytes.len() != N {
        return Err(TypesError::InvalidLength {
            expected: N,
            actual: bytes.len(),
        });
    }
    let mut arr = [0u8; N];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

/// Ledger account address of a sending identity or operator.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address([u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Derive an address from a transaction signing key: the trailing
    /// 20 bytes of its blake3 digest.
    pub fn from_public_key(public_key: &[u8; 32]) -> Self {
        let digest = blake3::hash(public_key);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest.as_bytes()[12..]);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        decode_fixed::<20>(s).map(Self)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address(0x{}...)", &self.to_hex()[..8])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

/// Hash of a signed transaction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHash([u8; 32]);

impl TxHash {
    pub fn new(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        decode_fixed::<32>(s).map(Self)
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash(0x{}...)", &self.to_hex()[..8])
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

/// Opaque ordering token for ledger time.
///
/// Deadlines are only ever compared against the ledger head. Block arithmetic
/// is left to ledger implementations and whoever drives them.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct BlockNumber(u64);

impl BlockNumber {
    pub const GENESIS: BlockNumber = BlockNumber(0);

    pub fn new(height: u64) -> Self {
        Self(height)
    }

    /// Raw height, for ledger implementations and logging.
    pub fn height(&self) -> u64 {
        self.0
    }

    /// True once `now` is strictly beyond this deadline.
    pub fn has_passed(&self, now: BlockNumber) -> bool {
        now > *self
    }
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Sequence number assigned to a task by the ledger.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TaskIndex(pub u32);

impl fmt::Display for TaskIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QuorumNumber(pub u8);

/// Set of quorums an operator participates in, one bit per quorum number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct QuorumBitmap(pub u64);

impl QuorumBitmap {
    pub fn single(quorum: QuorumNumber) -> Self {
        if quorum.0 < 64 {
            Self(1u64 << quorum.0)
        } else {
            Self(0)
        }
    }

    pub fn contains(&self, quorum: QuorumNumber) -> bool {
        quorum.0 < 64 && self.0 & (1u64 << quorum.0) != 0
    }

    pub fn without(&self, other: QuorumBitmap) -> Self {
        Self(self.0 & !other.0)
    }

    pub fn union(&self, other: QuorumBitmap) -> Self {
        Self(self.0 | other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_hex_roundtrip_accepts_prefix() {
        let addr = Address::from_public_key(&[7u8; 32]);
        let parsed = Address::from_hex(&addr.to_string()).unwrap();
        assert_eq!(addr, parsed);
        assert!(Address::from_hex("0x1234").is_err());
    }

    #[test]
    fn test_block_number_deadline_comparison() {
        let deadline = BlockNumber::new(10);
        assert!(!deadline.has_passed(BlockNumber::new(9)));
        assert!(!deadline.has_passed(BlockNumber::new(10)));
        assert!(deadline.has_passed(BlockNumber::new(11)));
    }

    #[test]
    fn test_quorum_bitmap() {
        let q0 = QuorumBitmap::single(QuorumNumber(0));
        let q3 = QuorumBitmap::single(QuorumNumber(3));
        let both = q0.union(q3);
        assert!(both.contains(QuorumNumber(0)));
        assert!(both.contains(QuorumNumber(3)));
        assert!(!both.contains(QuorumNumber(1)));
        assert_eq!(both.without(q0), q3);
        assert!(both.without(both).is_empty());
    }
}
