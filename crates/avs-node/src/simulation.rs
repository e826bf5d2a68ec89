//! A complete aggregator round against the in-memory ledger.
//!
//! Operators are registered with threshold key shares, squaring tasks are
//! dispatched, every operator signs an answer and the controller carries each
//! task to a terminal state. Faulty tasks are signed with a wrong answer so
//! the challenge path is exercised.

use crate::config::NodeConfig;
use anyhow::{ensure, Context, Result};
use avs_aggregator::SignatureAggregator;
use avs_challenges::{ChallengeVerifier, Squaring};
use avs_crypto::{generate_threshold_keys, OperatorKeyShare, ThresholdSigner};
use avs_ledger::{
    Ledger, LedgerWriter, LocalSigner, MemoryLedger, MemoryLedgerConfig, SubmissionEngine,
    TxSigner,
};
use avs_registry::{OperatorRegistry, RegistryConfig};
use avs_tasks::{
    Disposition, FileTaskStore, MemoryTaskStore, TaskController, TaskState, TaskStore,
};
use avs_types::{
    Address, BlockNumber, PartialSignature, QuorumBitmap, QuorumNumber, Stake, TaskIndex,
    TaskResponse,
};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub head: BlockNumber,
    pub dispositions: Vec<Disposition>,
    /// Tasks that were signed with a wrong answer.
    pub faulty: Vec<TaskIndex>,
    pub transitions: usize,
}

impl SimulationReport {
    pub fn count(&self, state: TaskState) -> usize {
        self.dispositions.iter().filter(|d| d.state == state).count()
    }

    pub fn disposition(&self, task_index: TaskIndex) -> Option<&Disposition> {
        self.dispositions.iter().find(|d| d.task_index == task_index)
    }
}

struct Operator {
    address: Address,
    key: OperatorKeyShare,
}

fn writer_for(
    ledger: &Arc<MemoryLedger>,
    signer: LocalSigner,
    config: &NodeConfig,
) -> Arc<LedgerWriter> {
    let engine = Arc::new(SubmissionEngine::new(
        ledger.clone(),
        Arc::new(signer),
        config.submission.clone(),
    ));
    Arc::new(LedgerWriter::new(
        engine,
        ledger.clone(),
        config.tasks.quorum_threshold_percentage,
    ))
}

async fn register_operators(
    ledger: &Arc<MemoryLedger>,
    keys: Vec<OperatorKeyShare>,
    quorum: QuorumNumber,
    config: &NodeConfig,
) -> Result<Vec<Operator>> {
    let mut operators = Vec::with_capacity(keys.len());
    for (i, key) in keys.into_iter().enumerate() {
        let signer = LocalSigner::generate();
        let address = signer.address();
        ledger
            .set_delegated_stake(address, Stake(config.simulation.stake_per_operator as u128))
            .await;

        // Each operator registers itself through its own registry and key.
        let writer = writer_for(ledger, signer, config);
        let registry = OperatorRegistry::new(ledger.clone(), writer, RegistryConfig::default());
        registry
            .register_operator(
                key.public_key()?,
                QuorumBitmap::single(quorum),
                format!("127.0.0.1:{}", 9000 + i),
            )
            .await
            .with_context(|| format!("registering operator {i}"))?;
        operators.push(Operator { address, key });
    }
    Ok(operators)
}

/// Run one local round and report where every task ended up.
pub async fn run_simulation(config: &NodeConfig) -> Result<SimulationReport> {
    let sim = &config.simulation;
    ensure!(
        sim.faulty_tasks <= sim.tasks,
        "faulty_tasks ({}) exceeds tasks ({})",
        sim.faulty_tasks,
        sim.tasks
    );

    let (_, keys) = generate_threshold_keys(sim.operators, sim.key_threshold)
        .context("generating operator key shares")?;
    let ledger = Arc::new(
        MemoryLedger::new(MemoryLedgerConfig {
            inclusion_delay: sim.inclusion_delay,
            challenge_window_blocks: sim.challenge_window_blocks,
            ..Default::default()
        })
        .with_signature_verification(),
    );
    let quorum = QuorumNumber(config.tasks.quorum_number);
    let operators = register_operators(&ledger, keys, quorum, config).await?;
    info!(
        operators = operators.len(),
        key_threshold = sim.key_threshold,
        "🧬 Operators registered"
    );

    let aggregator_writer = writer_for(&ledger, LocalSigner::generate(), config);
    let challenger_writer = writer_for(&ledger, LocalSigner::generate(), config);
    let registry = Arc::new(OperatorRegistry::new(
        ledger.clone(),
        aggregator_writer.clone(),
        RegistryConfig::default(),
    ));
    let aggregator = Arc::new(SignatureAggregator::new(config.aggregator.clone()));
    let store: Arc<dyn TaskStore> = match &config.tasks.store_dir {
        Some(dir) => Arc::new(
            FileTaskStore::open(dir)
                .await
                .with_context(|| format!("opening task store {}", dir.display()))?,
        ),
        None => Arc::new(MemoryTaskStore::new()),
    };
    let verifier = Arc::new(ChallengeVerifier::new(
        ledger.clone(),
        challenger_writer,
        Arc::new(Squaring),
        config.challenges.clone(),
    ));
    let (controller, mut events) = TaskController::new(
        ledger.clone(),
        aggregator_writer,
        registry,
        aggregator,
        store,
        config.tasks.controller.clone(),
    )
    .with_verifier(verifier.clone())
    .with_events();

    let signer = ThresholdSigner::task_responses();
    let first_faulty = sim.tasks - sim.faulty_tasks;
    let mut dispatched = Vec::with_capacity(sim.tasks);
    let mut faulty = Vec::new();
    let mut last_deadline = BlockNumber::GENESIS;

    for i in 0..sim.tasks {
        let value = i as u64 + 2;
        let head = ledger.head_block().await?;
        let deadline = BlockNumber::new(head.height() + config.tasks.response_window_blocks);
        let task = controller
            .dispatch(Squaring::encode_input(value), quorum, deadline)
            .await
            .with_context(|| format!("dispatching task {i}"))?;

        let mut answer = (value as u128) * (value as u128);
        if i >= first_faulty {
            answer += 1;
            faulty.push(task.index);
        }
        let response = TaskResponse::new(task.index, answer.to_be_bytes().to_vec());
        for operator in &operators {
            let share = signer.sign_share(&operator.key, &response.digest())?;
            let partial = PartialSignature {
                operator: operator.address,
                task_index: task.index,
                response: response.clone(),
                share,
            };
            if let Err(e) = controller.add_partial(partial).await {
                warn!(task_index = %task.index, operator = %operator.address, error = %e, "⚠️ Share refused");
            }
        }

        let state = controller.settle(task.index).await?;
        info!(task_index = %task.index, state = ?state, "📦 Task settled");
        if task.challenge_deadline > last_deadline {
            last_deadline = task.challenge_deadline;
        }
        dispatched.push(task.index);
    }

    // Run every challenge window out.
    let head = ledger.head_block().await?;
    if !last_deadline.has_passed(head) {
        ledger
            .advance_blocks(last_deadline.height() - head.height() + 1)
            .await;
    }
    for (task_index, result) in controller.advance_all().await {
        if let Err(e) = result {
            warn!(task_index = %task_index, error = %e, "❌ Task could not advance");
        }
    }
    let head = ledger.head_block().await?;
    let finalized = verifier.finalize_expired(head).await?;
    verifier.windows().cleanup_resolved().await;

    let mut dispositions = Vec::with_capacity(dispatched.len());
    for task_index in dispatched {
        dispositions.push(controller.disposition(task_index).await?);
    }
    let mut transitions = 0;
    while events.try_recv().is_ok() {
        transitions += 1;
    }

    let report = SimulationReport {
        head,
        dispositions,
        faulty,
        transitions,
    };
    info!(
        head = %report.head,
        final_tasks = report.count(TaskState::Final),
        challenged = report.count(TaskState::Challenged),
        abandoned = report.count(TaskState::Abandoned),
        windows_finalized = finalized.len(),
        transitions = report.transitions,
        "📊 Simulation finished"
    );
    Ok(report)
}
