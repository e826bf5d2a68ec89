use crate::{
    Address, BlockNumber, BlsPublicKey, BlsSignature, BlsSignatureShare, OperatorInfo,
    QuorumNumber, Stake, TaskIndex,
};
use serde::{Deserialize, Serialize};

/// A unit of work created on the ledger. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub index: TaskIndex,
    pub input: Vec<u8>,
    pub quorum_number: QuorumNumber,
    pub quorum_threshold_percentage: u8,
    pub created_block: BlockNumber,
    /// Last block at which a response is accepted.
    pub response_deadline: BlockNumber,
    /// Last block at which a challenge against the response is accepted.
    pub challenge_deadline: BlockNumber,
}

/// The answer operators sign for a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskResponse {
    pub task_index: TaskIndex,
    pub answer: Vec<u8>,
}

impl TaskResponse {
    pub fn new(task_index: TaskIndex, answer: Vec<u8>) -> Self {
        Self { task_index, answer }
    }

    /// Message digest that operators sign.
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.task_index.0.to_be_bytes());
        hasher.update(&self.answer);
        *hasher.finalize().as_bytes()
    }
}

/// Recorded by the ledger alongside an accepted response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResponseMetadata {
    pub task_responded_block: BlockNumber,
    pub hash_of_non_signers: [u8; 32],
}

/// Digest over the non-signer public keys in submission order.
pub fn hash_non_signers(pubkeys: &[BlsPublicKey]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    for key in pubkeys {
        hasher.update(&key.share_index.to_be_bytes());
        hasher.update(key.as_bytes());
    }
    *hasher.finalize().as_bytes()
}

/// One operator's signed vote for a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialSignature {
    pub operator: Address,
    pub task_index: TaskIndex,
    pub response: TaskResponse,
    pub share: BlsSignatureShare,
}

/// The bundle submitted on chain with a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonSignerStakesAndSignature {
    pub non_signer_pubkeys: Vec<BlsPublicKey>,
    pub quorum_total_stake: Stake,
    pub quorum_signed_stake: Stake,
    pub aggregate_signature: BlsSignature,
    pub snapshot_block: BlockNumber,
}

/// Final, immutable outcome of aggregation for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedResponse {
    pub task_index: TaskIndex,
    pub response: TaskResponse,
    pub aggregate_signature: BlsSignature,
    /// Ascending by address.
    pub signers: Vec<Address>,
    /// Ascending by address. Together with `signers` covers the snapshot.
    pub non_signers: Vec<OperatorInfo>,
    /// Shares that produced the aggregate, kept as evidence for challenges.
    pub signer_shares: Vec<(Address, BlsSignatureShare)>,
    pub snapshot_block: BlockNumber,
    pub signed_stake: Stake,
    pub total_stake: Stake,
}

impl AggregatedResponse {
    pub fn non_signer_pubkeys(&self) -> Vec<BlsPublicKey> {
        self.non_signers.iter().map(|o| o.bls_pubkey.clone()).collect()
    }

    pub fn to_non_signer_stakes_and_signature(&self) -> NonSignerStakesAndSignature {
        NonSignerStakesAndSignature {
            non_signer_pubkeys: self.non_signer_pubkeys(),
            quorum_total_stake: self.total_stake,
            quorum_signed_stake: self.signed_stake,
            aggregate_signature: self.aggregate_signature.clone(),
            snapshot_block: self.snapshot_block,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_binds_task_index() {
        let a = TaskResponse::new(TaskIndex(1), vec![4]);
        let b = TaskResponse::new(TaskIndex(2), vec![4]);
        assert_ne!(a.digest(), b.digest());
        assert_eq!(a.digest(), TaskResponse::new(TaskIndex(1), vec![4]).digest());
    }

    #[test]
    fn test_non_signer_hash_is_order_sensitive() {
        let k1 = BlsPublicKey::new(0, vec![1, 2, 3]);
        let k2 = BlsPublicKey::new(1, vec![4, 5, 6]);
        let forward = hash_non_signers(&[k1.clone(), k2.clone()]);
        let reverse = hash_non_signers(&[k2, k1]);
        assert_ne!(forward, reverse);
        assert_ne!(hash_non_signers(&[]), forward);
    }

    #[test]
    fn test_task_serde_roundtrip() {
        let task = Task {
            index: TaskIndex(3),
            input: vec![9],
            quorum_number: QuorumNumber(0),
            quorum_threshold_percentage: 67,
            created_block: BlockNumber::new(10),
            response_deadline: BlockNumber::new(20),
            challenge_deadline: BlockNumber::new(30),
        };
        let json = serde_json::to_string(&task).unwrap();
        let back: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(task, back);
    }
}
