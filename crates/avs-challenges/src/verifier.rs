use crate::{
    ChallengeConfig, ChallengeError, ChallengeOutcome, ChallengeRecord, ChallengeRecordStatus,
    ChallengeStatus, ChallengeWindow, ChallengeWindowManager, Computation, Result, Verdict,
};
use avs_ledger::{Ledger, LedgerError, RecordedResponse, Writer};
use avs_types::{Address, AggregatedResponse, BlockNumber, Task, TaskIndex, TaskResponse};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Recomputes recorded answers and challenges the wrong ones.
pub struct ChallengeVerifier {
    ledger: Arc<dyn Ledger>,
    writer: Arc<dyn Writer>,
    computation: Arc<dyn Computation>,
    windows: ChallengeWindowManager,
    config: ChallengeConfig,
}

impl ChallengeVerifier {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        writer: Arc<dyn Writer>,
        computation: Arc<dyn Computation>,
        config: ChallengeConfig,
    ) -> Self {
        Self {
            ledger,
            writer,
            computation,
            windows: ChallengeWindowManager::new(),
            config,
        }
    }

    pub fn windows(&self) -> &ChallengeWindowManager {
        &self.windows
    }

    pub fn config(&self) -> &ChallengeConfig {
        &self.config
    }

    pub fn verify(&self, task: &Task, response: &TaskResponse) -> Result<Verdict> {
        let recomputed = self.computation.compute(&task.input)?;
        if recomputed == response.answer {
            debug!(task_index = %task.index, "Recorded answer verified");
            Ok(Verdict::Match)
        } else {
            warn!(
                task_index = %task.index,
                submitted = hex::encode(&response.answer),
                recomputed = hex::encode(&recomputed),
                "🚨 Response mismatch detected"
            );
            Ok(Verdict::Mismatch { recomputed })
        }
    }

    /// Raise a challenge against the recorded response of `task`.
    ///
    /// Refused with [`ChallengeError::WindowClosed`] without any ledger write
    /// once the head is past the task's challenge deadline.
    pub async fn challenge(
        &self,
        task: &Task,
        aggregated: &AggregatedResponse,
        verdict: &Verdict,
    ) -> Result<ChallengeRecord> {
        let recomputed = match verdict {
            Verdict::Match => return Err(ChallengeError::NothingToChallenge(task.index)),
            Verdict::Mismatch { recomputed } => recomputed.clone(),
        };

        let facts = self
            .ledger
            .task_facts(task.index)
            .await?
            .ok_or(LedgerError::UnknownTask(task.index))?;
        let recorded = facts
            .response
            .ok_or(ChallengeError::NotResponded(task.index))?;
        if recorded.response != aggregated.response {
            return Err(ChallengeError::ResponseMismatch(task.index));
        }

        let window = self.open_for(task, &recorded).await?;
        if matches!(
            window.status,
            ChallengeStatus::Challenged | ChallengeStatus::Slashed
        ) {
            return Err(ChallengeError::DuplicateChallenge(task.index));
        }

        let proof = if self.config.include_share_proof {
            aggregated.signer_shares.clone()
        } else {
            Vec::new()
        };
        let mut record = ChallengeRecord {
            task_index: task.index,
            response_digest: recorded.response.digest(),
            response: recorded.response.clone(),
            recomputed,
            proof,
            status: ChallengeRecordStatus::Pending,
        };

        // Someone already challenged this response, possibly us before a restart.
        if let Some(existing) = facts.challenge {
            info!(task_index = %task.index, tx_hash = %existing.tx_hash, "Challenge already on ledger");
            self.confirm(task.index, existing.challenger, existing.block, aggregated)
                .await?;
            record.status = ChallengeRecordStatus::Confirmed {
                tx_hash: existing.tx_hash,
                block: existing.block,
            };
            return Ok(record);
        }

        let head = self.ledger.head_block().await?;
        if task.challenge_deadline.has_passed(head) {
            return Err(self.window_closed(task, head));
        }

        info!(
            task_index = %task.index,
            deadline = %task.challenge_deadline,
            head = %head,
            proof_shares = record.proof.len(),
            "⚔️ Raising challenge"
        );
        let receipt = match self
            .writer
            .raise_challenge(
                task,
                &recorded.response,
                &recorded.metadata,
                &recorded.non_signer_pubkeys,
                &record.proof,
            )
            .await
        {
            Ok(receipt) => receipt,
            Err(err @ LedgerError::Reverted { .. }) => {
                // Mined after the deadline.
                let head = self.ledger.head_block().await?;
                if task.challenge_deadline.has_passed(head) {
                    return Err(self.window_closed(task, head));
                }
                return Err(err.into());
            }
            Err(err) => return Err(err.into()),
        };

        self.confirm(task.index, receipt.from, receipt.block, aggregated)
            .await?;
        record.status = ChallengeRecordStatus::Confirmed {
            tx_hash: receipt.tx_hash,
            block: receipt.block,
        };
        Ok(record)
    }

    /// Verify a recorded response and challenge it when wrong.
    pub async fn check_response(
        &self,
        task: &Task,
        aggregated: &AggregatedResponse,
    ) -> Result<ChallengeOutcome> {
        self.track_response(task).await?;
        if !self.config.enabled {
            return Ok(ChallengeOutcome::Unchallenged);
        }
        let verdict = self.verify(task, &aggregated.response)?;
        let recomputed = match &verdict {
            Verdict::Match => return Ok(ChallengeOutcome::Unchallenged),
            Verdict::Mismatch { recomputed } => recomputed.clone(),
        };

        match self.challenge(task, aggregated, &verdict).await {
            Ok(record) => Ok(ChallengeOutcome::Challenged(record)),
            Err(ChallengeError::WindowClosed { head, .. }) => {
                Ok(ChallengeOutcome::WindowClosed(ChallengeRecord {
                    task_index: task.index,
                    response: aggregated.response.clone(),
                    response_digest: aggregated.response.digest(),
                    recomputed,
                    proof: aggregated.signer_shares.clone(),
                    status: ChallengeRecordStatus::WindowClosed { head },
                }))
            }
            Err(err) => Err(err),
        }
    }

    /// Open the challenge window for the response recorded on the ledger.
    pub async fn track_response(&self, task: &Task) -> Result<ChallengeWindow> {
        let recorded = self
            .ledger
            .task_facts(task.index)
            .await?
            .ok_or(LedgerError::UnknownTask(task.index))?
            .response
            .ok_or(ChallengeError::NotResponded(task.index))?;
        self.open_for(task, &recorded).await
    }

    /// Finalize every tracked window whose deadline passed unchallenged.
    pub async fn finalize_expired(&self, now: BlockNumber) -> Result<Vec<TaskIndex>> {
        let mut finalized = Vec::new();
        for window in self.windows.expired_windows(now).await {
            self.windows.finalize_window(window.task_index, now).await?;
            finalized.push(window.task_index);
        }
        Ok(finalized)
    }

    async fn open_for(&self, task: &Task, recorded: &RecordedResponse) -> Result<ChallengeWindow> {
        self.windows
            .open_window(
                task.index,
                recorded.response.digest(),
                recorded.metadata.task_responded_block,
                task.challenge_deadline,
            )
            .await?;
        self.windows
            .get_window(task.index)
            .await
            .ok_or(ChallengeError::WindowNotFound(task.index))
    }

    async fn confirm(
        &self,
        task_index: TaskIndex,
        challenger: Address,
        at: BlockNumber,
        aggregated: &AggregatedResponse,
    ) -> Result<()> {
        self.windows
            .submit_challenge(task_index, challenger, at)
            .await?;
        self.windows
            .mark_slashed(task_index, aggregated.signers.clone())
            .await
    }

    fn window_closed(&self, task: &Task, head: BlockNumber) -> ChallengeError {
        warn!(
            task_index = %task.index,
            deadline = %task.challenge_deadline,
            head = %head,
            "⌛ Challenge window closed before a challenge could be raised"
        );
        ChallengeError::WindowClosed {
            task_index: task.index,
            deadline: task.challenge_deadline,
            head,
        }
    }
}
