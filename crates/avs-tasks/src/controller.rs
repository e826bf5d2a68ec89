use crate::{
    Disposition, Result, TaskError, TaskEvent, TaskFailure, TaskRecord, TaskState, TaskStore,
};
use crate::state::{FailureClass, StateChange};
use avs_aggregator::{Finalization, QuorumStatus, SignatureAggregator};
use avs_challenges::{ChallengeError, ChallengeOutcome, ChallengeVerifier};
use avs_ledger::{ErrorClass, Ledger, LedgerError, Writer};
use avs_registry::OperatorRegistry;
use avs_types::{BlockNumber, PartialSignature, QuorumNumber, Task, TaskIndex, TxHash};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Retryable submission failures tolerated before a task is abandoned.
    pub max_submission_failures: u32,

    /// Release aggregation state as soon as a task leaves aggregation.
    pub close_finished_aggregations: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_submission_failures: 3,
            close_finished_aggregations: true,
        }
    }
}

/// Owns every task from dispatch until it reaches a terminal state.
///
/// Each task record sits behind its own mutex, so steps for one task are
/// serialized while different tasks progress concurrently. Every step is
/// persisted to the [`TaskStore`] before it is reported.
pub struct TaskController {
    ledger: Arc<dyn Ledger>,
    writer: Arc<dyn Writer>,
    registry: Arc<OperatorRegistry>,
    aggregator: Arc<SignatureAggregator>,
    verifier: Option<Arc<ChallengeVerifier>>,
    store: Arc<dyn TaskStore>,
    tasks: RwLock<HashMap<TaskIndex, Arc<Mutex<TaskRecord>>>>,
    config: ControllerConfig,
    event_tx: Option<mpsc::UnboundedSender<TaskEvent>>,
}

impl TaskController {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        writer: Arc<dyn Writer>,
        registry: Arc<OperatorRegistry>,
        aggregator: Arc<SignatureAggregator>,
        store: Arc<dyn TaskStore>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            ledger,
            writer,
            registry,
            aggregator,
            verifier: None,
            store,
            tasks: RwLock::new(HashMap::new()),
            config,
            event_tx: None,
        }
    }

    /// Check every recorded response and challenge the wrong ones.
    pub fn with_verifier(mut self, verifier: Arc<ChallengeVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Emit a [`TaskEvent`] for every transition.
    pub fn with_events(mut self) -> (Self, mpsc::UnboundedReceiver<TaskEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.event_tx = Some(tx);
        (self, rx)
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Create a task on the ledger and start collecting shares for it.
    pub async fn dispatch(
        &self,
        input: Vec<u8>,
        quorum_number: QuorumNumber,
        response_deadline: BlockNumber,
    ) -> Result<Task> {
        let (task, task_index) = self
            .writer
            .dispatch_task(input, quorum_number, response_deadline)
            .await?;
        self.registry.note_confirmed(task.created_block).await;

        // The ledger task exists from here on; keep a record of it even if
        // aggregation cannot be opened yet.
        let mut record = TaskRecord::new(task.clone());
        self.store.put(&record).await?;
        let opened = self.step(&mut record, task.created_block).await;
        self.store.put(&record).await?;
        self.tasks
            .write()
            .await
            .insert(task_index, Arc::new(Mutex::new(record)));
        if let Err(e) = opened {
            warn!(task_index = %task_index, error = %e, "⚠️ Task created but aggregation not opened");
            return Err(e);
        }

        info!(
            task_index = %task_index,
            quorum = quorum_number.0,
            response_deadline = %task.response_deadline,
            challenge_deadline = %task.challenge_deadline,
            "🚀 Task dispatched"
        );
        Ok(task)
    }

    /// Hand one operator share to the aggregator.
    ///
    /// A share arriving after the response deadline is refused and the task
    /// is moved on from collection.
    pub async fn add_partial(&self, partial: PartialSignature) -> Result<QuorumStatus> {
        let handle = self.handle(partial.task_index).await?;
        let mut record = handle.lock().await;
        let task_index = record.index();

        if !matches!(record.state, TaskState::Collecting | TaskState::Aggregating) {
            return Err(TaskError::NotCollecting {
                task_index,
                state: record.state,
            });
        }

        let head = self.ledger.head_block().await?;
        let deadline = record.task.response_deadline;
        if deadline.has_passed(head) {
            debug!(task_index = %task_index, operator = %partial.operator, "Share after response deadline");
            let stepped = self.step(&mut record, head).await;
            self.store.put(&record).await?;
            stepped?;
            return Err(TaskError::DeadlinePassed {
                task_index,
                deadline,
                head,
            });
        }

        let status = match self.aggregator.add_partial(partial).await {
            Ok(status) => status,
            Err(err) => {
                if err.is_protocol_violation() {
                    record.rejected_shares.push(err.to_string());
                    self.store.put(&record).await?;
                }
                return Err(err.into());
            }
        };

        if status.reached && record.state == TaskState::Collecting {
            self.transition(&mut record, TaskState::Aggregating)?;
            self.store.put(&record).await?;
        }
        Ok(status)
    }

    /// Drive a task one step against the current ledger head.
    pub async fn advance(&self, task_index: TaskIndex) -> Result<TaskState> {
        let handle = self.handle(task_index).await?;
        let mut record = handle.lock().await;
        if record.state.is_terminal() {
            return Ok(record.state);
        }
        let head = self.ledger.head_block().await?;
        let stepped = self.step(&mut record, head).await;
        self.store.put(&record).await?;
        stepped?;
        Ok(record.state)
    }

    /// Advance a task until a step leaves its state unchanged.
    pub async fn settle(&self, task_index: TaskIndex) -> Result<TaskState> {
        loop {
            let before = self.state_of(task_index).await?;
            let after = self.advance(task_index).await?;
            if after == before || after.is_terminal() {
                return Ok(after);
            }
        }
    }

    /// Advance every task that has not reached a terminal state.
    pub async fn advance_all(&self) -> Vec<(TaskIndex, Result<TaskState>)> {
        let mut results = Vec::new();
        for task_index in self.active_tasks().await {
            results.push((task_index, self.advance(task_index).await));
        }
        results
    }

    /// Apply the verifier's result for a task awaiting its challenge window.
    pub async fn record_challenge_outcome(
        &self,
        task_index: TaskIndex,
        outcome: ChallengeOutcome,
    ) -> Result<TaskState> {
        let handle = self.handle(task_index).await?;
        let mut record = handle.lock().await;
        let target = match &outcome {
            ChallengeOutcome::Unchallenged => return Ok(record.state),
            ChallengeOutcome::Challenged(_) => TaskState::Challenged,
            ChallengeOutcome::WindowClosed(_) => TaskState::Final,
        };
        if record.state == target {
            return Ok(target);
        }
        self.apply_outcome(&mut record, outcome)?;
        record.response_checked = true;
        self.store.put(&record).await?;
        Ok(record.state)
    }

    /// Reload every stored record and reconcile the unfinished ones with
    /// the ledger.
    pub async fn recover(&self) -> Result<Vec<Disposition>> {
        let head = self.ledger.head_block().await?;
        let mut recovered = Vec::new();
        for mut record in self.store.list().await? {
            let task_index = record.index();
            if !record.state.is_terminal() {
                let before = record.state;
                self.reconcile(&mut record, head).await?;
                self.store.put(&record).await?;
                info!(
                    task_index = %task_index,
                    from = ?before,
                    to = ?record.state,
                    "♻️ Task reconciled with ledger"
                );
            }
            recovered.push(record.disposition());
            self.tasks
                .write()
                .await
                .insert(task_index, Arc::new(Mutex::new(record)));
        }
        info!(tasks = recovered.len(), head = %head, "♻️ Task records recovered");
        Ok(recovered)
    }

    pub async fn disposition(&self, task_index: TaskIndex) -> Result<Disposition> {
        if let Some(handle) = self.tasks.read().await.get(&task_index).cloned() {
            return Ok(handle.lock().await.disposition());
        }
        self.store
            .get(task_index)
            .await?
            .map(|r| r.disposition())
            .ok_or(TaskError::UnknownTask(task_index))
    }

    pub async fn record(&self, task_index: TaskIndex) -> Result<TaskRecord> {
        let handle = self.handle(task_index).await?;
        let record = handle.lock().await;
        Ok(record.clone())
    }

    pub async fn active_tasks(&self) -> Vec<TaskIndex> {
        let handles: Vec<_> = self
            .tasks
            .read()
            .await
            .iter()
            .map(|(index, handle)| (*index, handle.clone()))
            .collect();
        let mut active = Vec::new();
        for (index, handle) in handles {
            if !handle.lock().await.state.is_terminal() {
                active.push(index);
            }
        }
        active.sort();
        active
    }

    async fn state_of(&self, task_index: TaskIndex) -> Result<TaskState> {
        let handle = self.handle(task_index).await?;
        let state = handle.lock().await.state;
        Ok(state)
    }

    async fn handle(&self, task_index: TaskIndex) -> Result<Arc<Mutex<TaskRecord>>> {
        self.tasks
            .read()
            .await
            .get(&task_index)
            .cloned()
            .ok_or(TaskError::UnknownTask(task_index))
    }

    async fn open_aggregation(&self, task: &Task) -> Result<usize> {
        let snapshot = self
            .registry
            .snapshot_at(task.created_block, task.quorum_number)
            .await?;
        let operators = snapshot.len();
        self.aggregator.open_task(task.clone(), snapshot).await;
        Ok(operators)
    }

    async fn release(&self, task_index: TaskIndex) {
        if self.config.close_finished_aggregations {
            self.aggregator.close_task(task_index).await;
        }
    }

    async fn step(&self, record: &mut TaskRecord, head: BlockNumber) -> Result<()> {
        match record.state {
            TaskState::Created => {
                let operators = self.open_aggregation(&record.task).await?;
                debug!(task_index = %record.index(), operators, "Aggregation opened");
                self.transition(record, TaskState::Collecting)
            }
            TaskState::Collecting => self.step_collecting(record, head).await,
            TaskState::Aggregating => self.step_aggregating(record, head).await,
            TaskState::Submitting => self.step_submitting(record).await,
            TaskState::AwaitingChallengeWindow => self.step_awaiting(record, head).await,
            TaskState::Final | TaskState::Challenged | TaskState::Abandoned => Ok(()),
        }
    }

    async fn step_collecting(&self, record: &mut TaskRecord, head: BlockNumber) -> Result<()> {
        let task_index = record.index();
        let status = self.aggregator.status(task_index).await?;
        let deadline_passed = record.task.response_deadline.has_passed(head);

        if deadline_passed && status.signers == 0 {
            warn!(
                task_index = %task_index,
                deadline = %record.task.response_deadline,
                "⏰ No shares before response deadline"
            );
            record.failure = Some(TaskFailure::NoShares);
            self.transition(record, TaskState::Abandoned)?;
            self.release(task_index).await;
        } else if deadline_passed || status.reached {
            self.transition(record, TaskState::Aggregating)?;
        }
        Ok(())
    }

    async fn step_aggregating(&self, record: &mut TaskRecord, head: BlockNumber) -> Result<()> {
        let task_index = record.index();
        let deadline_passed = record.task.response_deadline.has_passed(head);

        let finalization = match self.aggregator.finalize(task_index, head).await {
            Ok(finalization) => finalization,
            Err(err) if deadline_passed => {
                error!(task_index = %task_index, error = %err, "❌ Aggregation failed");
                record.failure = Some(TaskFailure::Aggregation {
                    reason: err.to_string(),
                });
                self.transition(record, TaskState::Abandoned)?;
                self.release(task_index).await;
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        match finalization {
            Finalization::Response(aggregated) => {
                info!(
                    task_index = %task_index,
                    signers = aggregated.signers.len(),
                    non_signers = aggregated.non_signers.len(),
                    signed_stake = %aggregated.signed_stake,
                    "🔏 Aggregated response ready"
                );
                record.aggregated = Some(aggregated);
                self.transition(record, TaskState::Submitting)?;
                self.release(task_index).await;
            }
            Finalization::InsufficientQuorum {
                signed_stake,
                total_stake,
                threshold_percentage,
            } => {
                // Redelivered shares may still arrive before the deadline.
                if deadline_passed {
                    record.failure = Some(TaskFailure::InsufficientQuorum {
                        signed_stake,
                        total_stake,
                        threshold_percentage,
                    });
                    self.transition(record, TaskState::Abandoned)?;
                    self.release(task_index).await;
                }
            }
        }
        Ok(())
    }

    async fn step_submitting(&self, record: &mut TaskRecord) -> Result<()> {
        let task_index = record.index();
        let Some(aggregated) = record.aggregated.clone() else {
            record.failure = Some(TaskFailure::Aggregation {
                reason: "aggregated response missing from record".to_string(),
            });
            return self.transition(record, TaskState::Abandoned);
        };

        record.submission_attempts += 1;
        let submitted = self
            .writer
            .submit_aggregated_response(
                &record.task,
                &aggregated.response,
                &aggregated.to_non_signer_stakes_and_signature(),
            )
            .await;

        match submitted {
            Ok(receipt) => {
                info!(
                    task_index = %task_index,
                    tx_hash = %receipt.tx_hash,
                    block = %receipt.block,
                    "📤 Aggregated response recorded"
                );
                record.response_tx = Some(receipt.tx_hash);
                record.last_error = None;
                self.transition(record, TaskState::AwaitingChallengeWindow)
            }
            Err(err) => self.submission_failed(record, err).await,
        }
    }

    async fn submission_failed(&self, record: &mut TaskRecord, err: LedgerError) -> Result<()> {
        let task_index = record.index();

        // An abandoned broadcast may still have been included.
        if let Some(tx_hash) = self.recorded_response_tx(record).await {
            info!(task_index = %task_index, tx_hash = %tx_hash, "Response found on ledger after failed submission");
            record.response_tx = Some(tx_hash);
            record.last_error = None;
            return self.transition(record, TaskState::AwaitingChallengeWindow);
        }

        let class = err.class();
        let retryable = matches!(class, ErrorClass::Transient | ErrorClass::Stale);
        if retryable && record.submission_attempts < self.config.max_submission_failures {
            warn!(
                task_index = %task_index,
                attempts = record.submission_attempts,
                error = %err,
                "⚠️ Response submission failed, will retry"
            );
            record.last_error = Some(err.to_string());
            return Ok(());
        }

        error!(
            task_index = %task_index,
            attempts = record.submission_attempts,
            class = ?class,
            error = %err,
            "❌ Response submission abandoned"
        );
        record.failure = Some(TaskFailure::Submission {
            class: FailureClass::from(class),
            reason: err.to_string(),
        });
        self.transition(record, TaskState::Abandoned)
    }

    async fn recorded_response_tx(&self, record: &TaskRecord) -> Option<TxHash> {
        let aggregated = record.aggregated.as_ref()?;
        let facts = self.ledger.task_facts(record.index()).await.ok()??;
        let recorded = facts.response?;
        (recorded.response == aggregated.response).then_some(recorded.tx_hash)
    }

    async fn step_awaiting(&self, record: &mut TaskRecord, head: BlockNumber) -> Result<()> {
        let task_index = record.index();

        if let (Some(verifier), Some(aggregated)) = (&self.verifier, record.aggregated.clone()) {
            if !record.response_checked {
                match verifier.check_response(&record.task, &aggregated).await {
                    Ok(outcome) => {
                        record.response_checked = true;
                        self.apply_outcome(record, outcome)?;
                        if record.state.is_terminal() {
                            return Ok(());
                        }
                    }
                    Err(ChallengeError::Ledger(err)) if err.is_transient() => {
                        return Err(ChallengeError::Ledger(err).into());
                    }
                    Err(err) => {
                        warn!(task_index = %task_index, error = %err, "Response check failed");
                        record.response_checked = true;
                        record.last_error = Some(err.to_string());
                    }
                }
            }
        }

        let facts = self
            .ledger
            .task_facts(task_index)
            .await?
            .ok_or(LedgerError::UnknownTask(task_index))?;
        if let Some(challenge) = facts.challenge {
            info!(task_index = %task_index, challenger = %challenge.challenger, "⚔️ Challenge recorded on ledger");
            self.transition(record, TaskState::Challenged)
        } else if record.task.challenge_deadline.has_passed(head) {
            info!(
                task_index = %task_index,
                deadline = %record.task.challenge_deadline,
                "✅ Challenge window closed, task final"
            );
            self.transition(record, TaskState::Final)
        } else {
            Ok(())
        }
    }

    fn apply_outcome(&self, record: &mut TaskRecord, outcome: ChallengeOutcome) -> Result<()> {
        match outcome {
            ChallengeOutcome::Unchallenged => Ok(()),
            ChallengeOutcome::Challenged(challenge) => {
                self.transition(record, TaskState::Challenged)?;
                record.challenge = Some(challenge);
                Ok(())
            }
            ChallengeOutcome::WindowClosed(challenge) => {
                self.transition(record, TaskState::Final)?;
                record.challenge = Some(challenge);
                Ok(())
            }
        }
    }

    async fn reconcile(&self, record: &mut TaskRecord, head: BlockNumber) -> Result<()> {
        let task_index = record.index();
        let Some(facts) = self.ledger.task_facts(task_index).await? else {
            if !record.state.can_transition_to(&TaskState::Abandoned) {
                return Err(LedgerError::UnknownTask(task_index).into());
            }
            warn!(task_index = %task_index, "Task missing on ledger");
            record.failure = Some(TaskFailure::MissingOnLedger);
            return self.transition(record, TaskState::Abandoned);
        };

        match record.state {
            TaskState::Created | TaskState::Collecting | TaskState::Aggregating => {
                // Collected shares did not survive the restart; gossip redelivers.
                self.open_aggregation(&record.task).await?;
                if record.state == TaskState::Created {
                    self.transition(record, TaskState::Collecting)?;
                }
                Ok(())
            }
            TaskState::Submitting => match (facts.response, &record.aggregated) {
                (Some(recorded), Some(aggregated)) if recorded.response == aggregated.response => {
                    record.response_tx = Some(recorded.tx_hash);
                    self.transition(record, TaskState::AwaitingChallengeWindow)
                }
                (Some(recorded), _) => {
                    record.failure = Some(TaskFailure::Submission {
                        class: FailureClass::ProtocolViolation,
                        reason: format!(
                            "ledger recorded a different response in {}",
                            recorded.tx_hash
                        ),
                    });
                    self.transition(record, TaskState::Abandoned)
                }
                (None, _) => {
                    debug!(task_index = %task_index, "Response not on ledger, resubmitting");
                    Ok(())
                }
            },
            TaskState::AwaitingChallengeWindow => {
                if facts.challenge.is_some() {
                    self.transition(record, TaskState::Challenged)
                } else if record.task.challenge_deadline.has_passed(head) {
                    self.transition(record, TaskState::Final)
                } else {
                    Ok(())
                }
            }
            TaskState::Final | TaskState::Challenged | TaskState::Abandoned => Ok(()),
        }
    }

    fn transition(&self, record: &mut TaskRecord, to: TaskState) -> Result<()> {
        let from = record.state;
        if !from.can_transition_to(&to) {
            return Err(TaskError::InvalidTransition {
                task_index: record.index(),
                from,
                to,
            });
        }

        let now = Utc::now();
        record.state = to;
        record.updated_at = now;
        record.history.push(StateChange { from, to, at: now });

        info!(task_index = %record.index(), from = ?from, to = ?to, "🔄 Task state changed");

        if let Some(ref tx) = self.event_tx {
            let event = TaskEvent {
                task_index: record.index(),
                from,
                to,
                timestamp: now,
            };
            if let Err(e) = tx.send(event) {
                warn!(task_index = %record.index(), error = %e, "Failed to emit task event");
            }
        }
        Ok(())
    }
}
