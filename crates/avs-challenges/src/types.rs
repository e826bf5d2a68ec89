use avs_types::{Address, BlockNumber, BlsSignatureShare, TaskIndex, TaskResponse, TxHash};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengeConfig {
    /// Recompute every recorded response. When off the verifier never
    /// raises challenges and windows simply run out.
    pub enabled: bool,

    /// Attach the signer shares of the wrong answer as proof.
    pub include_share_proof: bool,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            include_share_proof: true,
        }
    }
}

/// Status of a challenge window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeStatus {
    /// Window is open for challenges
    Active,

    /// Challenge confirmed on the ledger
    Challenged,

    /// Window expired, no challenges
    Finalized,

    /// Challenge confirmed and the signers of the wrong answer recorded
    Slashed,
}

/// Challenge window for one recorded response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeWindow {
    pub task_index: TaskIndex,
    pub response_digest: [u8; 32],
    pub opened_at: BlockNumber,
    pub deadline: BlockNumber,
    pub status: ChallengeStatus,
    pub challenger: Option<Address>,
    pub slashed: Vec<Address>,
}

impl ChallengeWindow {
    pub fn new(
        task_index: TaskIndex,
        response_digest: [u8; 32],
        opened_at: BlockNumber,
        deadline: BlockNumber,
    ) -> Self {
        Self {
            task_index,
            response_digest,
            opened_at,
            deadline,
            status: ChallengeStatus::Active,
            challenger: None,
            slashed: Vec::new(),
        }
    }

    pub fn is_active(&self, now: BlockNumber) -> bool {
        self.status == ChallengeStatus::Active && !self.deadline.has_passed(now)
    }

    pub fn is_expired(&self, now: BlockNumber) -> bool {
        self.deadline.has_passed(now)
    }

    pub fn is_resolved(&self) -> bool {
        self.status != ChallengeStatus::Active
    }
}

/// Result of recomputing a recorded answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Match,
    Mismatch { recomputed: Vec<u8> },
}

impl Verdict {
    pub fn is_mismatch(&self) -> bool {
        matches!(self, Verdict::Mismatch { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeRecordStatus {
    Pending,
    Confirmed { tx_hash: TxHash, block: BlockNumber },
    WindowClosed { head: BlockNumber },
}

/// A challenge against a wrong recorded answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeRecord {
    pub task_index: TaskIndex,
    pub response: TaskResponse,
    pub response_digest: [u8; 32],
    pub recomputed: Vec<u8>,
    /// Shares the signers produced over the wrong answer.
    pub proof: Vec<(Address, BlsSignatureShare)>,
    pub status: ChallengeRecordStatus,
}

impl ChallengeRecord {
    pub fn is_confirmed(&self) -> bool {
        matches!(self.status, ChallengeRecordStatus::Confirmed { .. })
    }
}

/// What checking one recorded response led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeOutcome {
    /// The recorded answer is correct.
    Unchallenged,
    /// A challenge was confirmed on the ledger.
    Challenged(ChallengeRecord),
    /// The answer was wrong but the deadline had already passed.
    WindowClosed(ChallengeRecord),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_activity() {
        let window = ChallengeWindow::new(
            TaskIndex(1),
            [0u8; 32],
            BlockNumber::new(5),
            BlockNumber::new(10),
        );
        assert!(window.is_active(BlockNumber::new(10)));
        assert!(!window.is_expired(BlockNumber::new(10)));
        assert!(!window.is_active(BlockNumber::new(11)));
        assert!(window.is_expired(BlockNumber::new(11)));
        assert!(!window.is_resolved());
    }

    #[test]
    fn test_config_defaults_from_empty_table() {
        let config: ChallengeConfig = serde_json::from_str("{}").unwrap();
        assert!(config.enabled);
        assert!(config.include_share_proof);
    }
}
