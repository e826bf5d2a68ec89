use crate::{AggregationError, AggregatorConfig, Finalization, QuorumStatus, Result};
use avs_crypto::ThresholdSigner;
use avs_types::{
    AggregatedResponse, Address, BlockNumber, BlsSignatureShare, OperatorSet, PartialSignature,
    Stake, Task, TaskIndex, TaskResponse,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Shares backing one candidate response.
#[derive(Debug)]
struct Tally {
    response: TaskResponse,
    shares: BTreeMap<Address, BlsSignatureShare>,
    stake: Stake,
}

#[derive(Debug)]
struct Session {
    task: Task,
    snapshot: Arc<OperatorSet>,
    accepted: HashMap<Address, PartialSignature>,
    tallies: HashMap<[u8; 32], Tally>,
    finalized: Option<AggregatedResponse>,
}

impl Session {
    fn leading(&self) -> Option<(&[u8; 32], &Tally)> {
        // Ties break on digest so the choice does not depend on arrival order.
        self.tallies
            .iter()
            .max_by(|(da, a), (db, b)| a.stake.cmp(&b.stake).then_with(|| (*db).cmp(*da)))
    }

    fn status(&self) -> QuorumStatus {
        let total = self.snapshot.total_stake();
        let signed = self.leading().map(|(_, t)| t.stake).unwrap_or_default();
        QuorumStatus {
            task_index: self.task.index,
            signed_stake: signed,
            total_stake: total,
            signers: self.accepted.len(),
            reached: signed.meets_threshold(total, self.task.quorum_threshold_percentage),
            finalized: self.finalized.is_some(),
        }
    }
}

/// Collects partial signatures per task and finalizes them into aggregated
/// responses.
///
/// Each task has its own lock, so `add_partial` and `finalize` for one task
/// are serialized while different tasks proceed independently.
pub struct SignatureAggregator {
    config: AggregatorConfig,
    signer: ThresholdSigner,
    sessions: RwLock<HashMap<TaskIndex, Arc<Mutex<Session>>>>,
}

impl SignatureAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            config,
            signer: ThresholdSigner::task_responses(),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Start collecting for `task` against the operator set at its dispatch
    /// block. Reopening an already open task keeps its collected shares.
    pub async fn open_task(&self, task: Task, snapshot: Arc<OperatorSet>) {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&task.index) {
            return;
        }
        info!(
            task_index = %task.index,
            operators = snapshot.len(),
            total_stake = %snapshot.total_stake(),
            threshold = task.quorum_threshold_percentage,
            "📝 Aggregation opened"
        );
        sessions.insert(
            task.index,
            Arc::new(Mutex::new(Session {
                task,
                snapshot,
                accepted: HashMap::new(),
                tallies: HashMap::new(),
                finalized: None,
            })),
        );
    }

    async fn session(&self, task_index: TaskIndex) -> Result<Arc<Mutex<Session>>> {
        self.sessions
            .read()
            .await
            .get(&task_index)
            .cloned()
            .ok_or(AggregationError::TaskNotOpen(task_index))
    }

    pub async fn is_open(&self, task_index: TaskIndex) -> bool {
        self.sessions.read().await.contains_key(&task_index)
    }

    /// Accept one operator's share.
    ///
    /// Byte-identical redelivery is a no-op. A share that is valid but differs
    /// from the one already accepted for the same operator is reported as
    /// [`AggregationError::ConflictingShare`]. Shares arriving after
    /// finalization are ignored.
    pub async fn add_partial(&self, partial: PartialSignature) -> Result<QuorumStatus> {
        let session = self.session(partial.task_index).await?;
        let mut session = session.lock().await;
        let task_index = session.task.index;

        if session.finalized.is_some() {
            debug!(task_index = %task_index, operator = %partial.operator, "Share after finalization ignored");
            return Ok(session.status());
        }
        if partial.response.task_index != task_index {
            return Err(AggregationError::MismatchedTask {
                expected: task_index,
                actual: partial.response.task_index,
            });
        }

        let Some(operator) = session.snapshot.get(&partial.operator).cloned() else {
            warn!(task_index = %task_index, operator = %partial.operator, "⚠️ Share from unknown operator");
            return Err(AggregationError::UnknownOperator {
                task_index,
                operator: partial.operator,
            });
        };

        if let Some(existing) = session.accepted.get(&partial.operator) {
            if *existing == partial {
                debug!(task_index = %task_index, operator = %partial.operator, "Duplicate share ignored");
                return Ok(session.status());
            }
        }

        let digest = partial.response.digest();
        let valid = self
            .signer
            .verify_share(&operator.bls_pubkey, &digest, &partial.share)
            .unwrap_or(false);
        if !valid {
            warn!(task_index = %task_index, operator = %partial.operator, "❌ Invalid signature share");
            return Err(AggregationError::InvalidShare {
                task_index,
                operator: partial.operator,
            });
        }

        if session.accepted.contains_key(&partial.operator) {
            warn!(task_index = %task_index, operator = %partial.operator, "🚨 Conflicting signature share");
            return Err(AggregationError::ConflictingShare {
                task_index,
                operator: partial.operator,
            });
        }

        let tally = session.tallies.entry(digest).or_insert_with(|| Tally {
            response: partial.response.clone(),
            shares: BTreeMap::new(),
            stake: Stake::ZERO,
        });
        tally.stake = tally
            .stake
            .checked_add(operator.stake)
            .ok_or(AggregationError::StakeOverflow(task_index))?;
        tally.shares.insert(partial.operator, partial.share.clone());
        session.accepted.insert(partial.operator, partial);

        let status = session.status();
        debug!(
            task_index = %task_index,
            operator = %operator.address,
            signed_stake = %status.signed_stake,
            total_stake = %status.total_stake,
            signers = status.signers,
            reached = status.reached,
            "✅ Signature share accepted"
        );
        Ok(status)
    }

    pub async fn status(&self, task_index: TaskIndex) -> Result<QuorumStatus> {
        let session = self.session(task_index).await?;
        let session = session.lock().await;
        Ok(session.status())
    }

    /// Produce the aggregated response for a task.
    ///
    /// Whether a response can be produced depends on signed stake alone: the
    /// aggregate is the sum of the signers' shares, however many there are.
    /// The result is cached: later calls return the identical response.
    /// Without quorum the outcome is [`Finalization::InsufficientQuorum`],
    /// unless `now` is past the response deadline and the configured fallback
    /// threshold is met.
    pub async fn finalize(&self, task_index: TaskIndex, now: BlockNumber) -> Result<Finalization> {
        let session = self.session(task_index).await?;
        let mut session = session.lock().await;

        if let Some(done) = &session.finalized {
            return Ok(Finalization::Response(done.clone()));
        }

        let total = session.snapshot.total_stake();
        let threshold = session.task.quorum_threshold_percentage;
        let deadline_passed = session.task.response_deadline.has_passed(now);

        let Some((digest, tally)) = session.leading() else {
            return Ok(Finalization::InsufficientQuorum {
                signed_stake: Stake::ZERO,
                total_stake: total,
                threshold_percentage: threshold,
            });
        };

        let effective = if tally.stake.meets_threshold(total, threshold) {
            threshold
        } else {
            match self.config.fallback_threshold_percentage {
                Some(fallback) if deadline_passed && tally.stake.meets_threshold(total, fallback) => {
                    warn!(
                        task_index = %task_index,
                        threshold,
                        fallback,
                        "⚠️ Finalizing with fallback threshold"
                    );
                    fallback
                }
                _ => {
                    info!(
                        task_index = %task_index,
                        signed_stake = %tally.stake,
                        total_stake = %total,
                        threshold,
                        "❌ Insufficient quorum"
                    );
                    return Ok(Finalization::InsufficientQuorum {
                        signed_stake: tally.stake,
                        total_stake: total,
                        threshold_percentage: threshold,
                    });
                }
            }
        };

        let mut signer_keys = Vec::with_capacity(tally.shares.len());
        for (address, share) in &tally.shares {
            let operator = session
                .snapshot
                .get(address)
                .ok_or(AggregationError::UnknownOperator {
                    task_index,
                    operator: *address,
                })?;
            signer_keys.push((operator.bls_pubkey.clone(), share.clone()));
        }
        let aggregate_signature = self.signer.aggregate(digest, &signer_keys)?;

        let signers: Vec<Address> = tally.shares.keys().copied().collect();
        let non_signers = session
            .snapshot
            .iter()
            .filter(|op| !tally.shares.contains_key(&op.address))
            .cloned()
            .collect();
        let response = AggregatedResponse {
            task_index,
            response: tally.response.clone(),
            aggregate_signature,
            signers,
            non_signers,
            signer_shares: tally
                .shares
                .iter()
                .map(|(addr, share)| (*addr, share.clone()))
                .collect(),
            snapshot_block: session.snapshot.snapshot_block,
            signed_stake: tally.stake,
            total_stake: total,
        };

        info!(
            task_index = %task_index,
            signers = response.signers.len(),
            non_signers = response.non_signers.len(),
            signed_stake = %response.signed_stake,
            total_stake = %total,
            threshold = effective,
            "✨ Aggregated response finalized"
        );
        session.finalized = Some(response.clone());
        Ok(Finalization::Response(response))
    }

    /// Drop all state for a task. Returns whether it was open.
    pub async fn close_task(&self, task_index: TaskIndex) -> bool {
        let removed = self.sessions.write().await.remove(&task_index).is_some();
        if removed {
            debug!(task_index = %task_index, "🗑️ Aggregation closed");
        }
        removed
    }

    pub async fn open_tasks(&self) -> usize {
        self.sessions.read().await.len()
    }
}
