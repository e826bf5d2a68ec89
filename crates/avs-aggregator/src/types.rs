use avs_types::{AggregatedResponse, Stake, TaskIndex};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Lowered threshold accepted once the response deadline has passed.
    /// `None` disables fallback finalization.
    pub fallback_threshold_percentage: Option<u8>,
}

/// Progress of one task toward quorum, reported for its leading response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuorumStatus {
    pub task_index: TaskIndex,
    pub signed_stake: Stake,
    pub total_stake: Stake,
    /// Operators whose share was accepted, across all responses.
    pub signers: usize,
    pub reached: bool,
    pub finalized: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finalization {
    Response(AggregatedResponse),
    InsufficientQuorum {
        signed_stake: Stake,
        total_stake: Stake,
        threshold_percentage: u8,
    },
}

impl Finalization {
    pub fn response(&self) -> Option<&AggregatedResponse> {
        match self {
            Finalization::Response(r) => Some(r),
            Finalization::InsufficientQuorum { .. } => None,
        }
    }
}
