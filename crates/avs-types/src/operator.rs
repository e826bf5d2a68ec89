use crate::{Address, BlockNumber, BlsPublicKey, QuorumBitmap, QuorumNumber, Result, TypesError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Stake weight. Unsigned, so it can never go negative.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Stake(pub u128);

impl Stake {
    pub const ZERO: Stake = Stake(0);

    pub fn checked_add(self, other: Stake) -> Option<Stake> {
        self.0.checked_add(other.0).map(Stake)
    }

    /// `self / total >= percentage / 100`, evaluated in integers so that
    /// the boundary is exact for every stake.
    pub fn meets_threshold(self, total: Stake, percentage: u8) -> bool {
        if total.0 == 0 {
            return false;
        }
        // ceil(total * percentage / 100) without forming the full product.
        let pct = percentage as u128;
        let whole = (total.0 / 100).checked_mul(pct);
        let rest = (total.0 % 100 * pct).div_ceil(100);
        match whole.and_then(|w| w.checked_add(rest)) {
            Some(required) => self.0 >= required,
            None => false,
        }
    }
}

impl fmt::Display for Stake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registered operator as seen at some block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorInfo {
    pub address: Address,
    pub bls_pubkey: BlsPublicKey,
    pub stake: Stake,
    pub quorum_bitmap: QuorumBitmap,
    pub socket: String,
}

/// Operators eligible for one quorum at one block, keyed (and therefore
/// ordered) by address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorSet {
    pub snapshot_block: BlockNumber,
    pub quorum_number: QuorumNumber,
    operators: BTreeMap<Address, OperatorInfo>,
    total_stake: Stake,
}

impl OperatorSet {
    pub fn new(
        snapshot_block: BlockNumber,
        quorum_number: QuorumNumber,
        operators: Vec<OperatorInfo>,
    ) -> Result<Self> {
        let mut map = BTreeMap::new();
        let mut total = Stake::ZERO;
        for op in operators {
            total = total
                .checked_add(op.stake)
                .ok_or(TypesError::StakeOverflow {
                    block: snapshot_block.height(),
                })?;
            let address = op.address;
            if map.insert(address, op).is_some() {
                return Err(TypesError::DuplicateOperator(address.to_string()));
            }
        }
        Ok(Self {
            snapshot_block,
            quorum_number,
            operators: map,
            total_stake: total,
        })
    }

    pub fn empty(snapshot_block: BlockNumber, quorum_number: QuorumNumber) -> Self {
        Self {
            snapshot_block,
            quorum_number,
            operators: BTreeMap::new(),
            total_stake: Stake::ZERO,
        }
    }

    pub fn total_stake(&self) -> Stake {
        self.total_stake
    }

    pub fn get(&self, address: &Address) -> Option<&OperatorInfo> {
        self.operators.get(address)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.operators.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    /// Operators in ascending address order.
    pub fn iter(&self) -> impl Iterator<Item = &OperatorInfo> {
        self.operators.values()
    }

    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.operators.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn operator(byte: u8, stake: u128) -> OperatorInfo {
        OperatorInfo {
            address: Address::from_bytes([byte; 20]),
            bls_pubkey: BlsPublicKey::new(byte as u64, vec![byte; 4]),
            stake: Stake(stake),
            quorum_bitmap: QuorumBitmap::single(QuorumNumber(0)),
            socket: format!("127.0.0.1:{}", 9000 + byte as u16),
        }
    }

    #[test]
    fn test_threshold_boundary_is_inclusive() {
        // 4 equal operators, 67% threshold: 3 signers reach it, 2 do not.
        let total = Stake(400);
        assert!(Stake(300).meets_threshold(total, 67));
        assert!(!Stake(200).meets_threshold(total, 67));
        // exactly on the boundary
        assert!(Stake(50).meets_threshold(Stake(100), 50));
        assert!(!Stake(49).meets_threshold(Stake(100), 50));
    }

    #[test]
    fn test_zero_total_never_meets_threshold() {
        assert!(!Stake(0).meets_threshold(Stake(0), 0));
    }

    #[test]
    fn test_threshold_exact_near_u128_max() {
        let total = Stake(u128::MAX);
        let required = 227_989_185_837_028_770_520_460_986_979_284_701_675u128;
        assert!(Stake(required).meets_threshold(total, 67));
        assert!(!Stake(required - 1).meets_threshold(total, 67));

        assert!(Stake(u128::MAX).meets_threshold(total, 100));
        assert!(!Stake(u128::MAX - 1).meets_threshold(total, 100));
        // More than 100% is unreachable.
        assert!(!Stake(u128::MAX).meets_threshold(total, 101));
    }

    #[test]
    fn test_zero_percentage_always_met() {
        assert!(Stake(0).meets_threshold(Stake(1), 0));
        assert!(Stake(0).meets_threshold(Stake(u128::MAX), 0));
    }

    #[test]
    fn test_operator_set_is_sorted_and_summed() {
        let set = OperatorSet::new(
            BlockNumber::new(5),
            QuorumNumber(0),
            vec![operator(3, 10), operator(1, 20), operator(2, 30)],
        )
        .unwrap();

        assert_eq!(set.total_stake(), Stake(60));
        let order: Vec<u8> = set.iter().map(|o| o.address.as_bytes()[0]).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn test_operator_set_rejects_duplicates_and_overflow() {
        let dup = OperatorSet::new(
            BlockNumber::new(1),
            QuorumNumber(0),
            vec![operator(1, 1), operator(1, 2)],
        );
        assert!(matches!(dup, Err(TypesError::DuplicateOperator(_))));

        let overflow = OperatorSet::new(
            BlockNumber::new(1),
            QuorumNumber(0),
            vec![operator(1, u128::MAX), operator(2, 1)],
        );
        assert!(matches!(overflow, Err(TypesError::StakeOverflow { block: 1 })));
    }
}
