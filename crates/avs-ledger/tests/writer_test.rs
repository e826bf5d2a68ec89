//! Writer API against the in-memory ledger: idempotent retries, registry
//! history and the contract rules for responses and challenges.

use avs_crypto::{generate_threshold_keys, ThresholdSigner};
use avs_ledger::{
    Ledger, LedgerError, LedgerWriter, LocalSigner, MemoryLedger, MemoryLedgerConfig, OperatorStatus,
    SubmissionConfig, SubmissionEngine, TxSigner, TxStatus, Writer,
};
use avs_types::{
    hash_non_signers, Address, BlockNumber, BlsPublicKey, BlsSignature,
    NonSignerStakesAndSignature, QuorumBitmap, QuorumNumber, Stake, Task, TaskResponse,
};
use std::sync::Arc;

const QUORUM: QuorumNumber = QuorumNumber(0);

struct Operator {
    address: Address,
    writer: LedgerWriter,
    key: BlsPublicKey,
}

fn writer_for(ledger: &Arc<MemoryLedger>, signer: LocalSigner) -> LedgerWriter {
    let config = SubmissionConfig {
        initial_poll_interval_ms: 1,
        max_poll_interval_ms: 5,
        ..Default::default()
    };
    let engine = Arc::new(SubmissionEngine::new(ledger.clone(), Arc::new(signer), config));
    LedgerWriter::new(engine, ledger.clone(), 67)
}

async fn register_operators(ledger: &Arc<MemoryLedger>, count: u8) -> Vec<Operator> {
    let mut operators = Vec::new();
    for i in 0..count {
        let signer = LocalSigner::from_bytes(&[i + 1; 32]);
        let address = signer.address();
        ledger.set_delegated_stake(address, Stake(100)).await;
        let writer = writer_for(ledger, signer);
        let key = BlsPublicKey::new(i as u64, vec![i; 8]);
        writer
            .register_operator(key.clone(), QuorumBitmap::single(QUORUM), format!("op-{i}:9000"))
            .await
            .unwrap();
        operators.push(Operator {
            address,
            writer,
            key,
        });
    }
    operators
}

async fn dispatch(ledger: &Arc<MemoryLedger>, writer: &LedgerWriter, window: u64) -> Task {
    let head = ledger.head_block().await.unwrap();
    let (task, index) = writer
        .dispatch_task(vec![3], QUORUM, BlockNumber::new(head.height() + window))
        .await
        .unwrap();
    assert_eq!(task.index, index);
    task
}

async fn bundle(
    ledger: &Arc<MemoryLedger>,
    task: &Task,
    non_signers: &[&Operator],
) -> NonSignerStakesAndSignature {
    let snapshot = ledger
        .operator_set_snapshot(task.created_block, task.quorum_number)
        .await
        .unwrap();
    let non_signer_stake: u128 = non_signers.iter().map(|o| snapshot.get(&o.address).unwrap().stake.0).sum();
    NonSignerStakesAndSignature {
        non_signer_pubkeys: non_signers.iter().map(|o| o.key.clone()).collect(),
        quorum_total_stake: snapshot.total_stake(),
        quorum_signed_stake: Stake(snapshot.total_stake().0 - non_signer_stake),
        aggregate_signature: BlsSignature::new(vec![0xaa; 4]),
        snapshot_block: task.created_block,
    }
}

fn reverted_with(err: LedgerError, expected: &str) {
    match err {
        LedgerError::Reverted { reason, .. } => assert_eq!(reason, expected),
        other => panic!("expected revert '{expected}', got {other:?}"),
    }
}

#[tokio::test]
async fn test_register_operator_is_idempotent() {
    let ledger = Arc::new(MemoryLedger::default());
    let operators = register_operators(&ledger, 1).await;
    let op = &operators[0];

    let status = ledger.operator_registered(&op.address).await.unwrap();
    let OperatorStatus::Registered { tx_hash } = status else {
        panic!("operator should be registered");
    };

    let again = op
        .writer
        .register_operator(op.key.clone(), QuorumBitmap::single(QUORUM), "op-0:9000".into())
        .await
        .unwrap();
    assert_eq!(again.tx_hash, tx_hash);
    assert_eq!(ledger.broadcasts().await.len(), 1);
}

#[tokio::test]
async fn test_registry_history_snapshots() {
    let ledger = Arc::new(MemoryLedger::default());
    let operators = register_operators(&ledger, 3).await;
    let registered_at = ledger.head_block().await.unwrap();

    let receipt = operators[2]
        .writer
        .deregister_operator(operators[2].address, QuorumBitmap::single(QUORUM), operators[2].key.clone())
        .await
        .unwrap();
    let removed_at = receipt.block;

    let before = ledger.operator_set_snapshot(registered_at, QUORUM).await.unwrap();
    let after = ledger.operator_set_snapshot(removed_at, QUORUM).await.unwrap();
    assert_eq!(before.len(), 3);
    assert_eq!(after.len(), 2);
    assert!(!after.contains(&operators[2].address));
    assert_eq!(after.total_stake(), Stake(200));

    // Deregistering twice returns the recorded receipt.
    let again = operators[2]
        .writer
        .deregister_operator(operators[2].address, QuorumBitmap::single(QUORUM), operators[2].key.clone())
        .await
        .unwrap();
    assert_eq!(again.tx_hash, receipt.tx_hash);

    // Stake refresh takes effect from its own block only.
    ledger.set_delegated_stake(operators[0].address, Stake(50)).await;
    let aggregator = writer_for(&ledger, LocalSigner::generate());
    let refreshed = aggregator
        .update_stakes(vec![operators[0].address])
        .await
        .unwrap();
    let old = ledger.operator_set_snapshot(removed_at, QUORUM).await.unwrap();
    let new = ledger.operator_set_snapshot(refreshed.block, QUORUM).await.unwrap();
    assert_eq!(old.get(&operators[0].address).unwrap().stake, Stake(100));
    assert_eq!(new.get(&operators[0].address).unwrap().stake, Stake(50));
}

#[tokio::test]
async fn test_response_is_recorded_once() {
    let ledger = Arc::new(MemoryLedger::default());
    let operators = register_operators(&ledger, 4).await;
    let aggregator = writer_for(&ledger, LocalSigner::generate());
    let task = dispatch(&ledger, &aggregator, 10).await;

    let response = TaskResponse::new(task.index, vec![9]);
    let signature = bundle(&ledger, &task, &[&operators[3]]).await;
    let receipt = aggregator
        .submit_aggregated_response(&task, &response, &signature)
        .await
        .unwrap();
    assert_eq!(receipt.status, TxStatus::Success);
    let broadcasts = ledger.broadcasts().await.len();

    let retry = aggregator
        .submit_aggregated_response(&task, &response, &signature)
        .await
        .unwrap();
    assert_eq!(retry.tx_hash, receipt.tx_hash);
    assert_eq!(ledger.broadcasts().await.len(), broadcasts);

    let other = TaskResponse::new(task.index, vec![10]);
    let err = aggregator
        .submit_aggregated_response(&task, &other, &signature)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Conflict(_)));

    let facts = ledger.task_facts(task.index).await.unwrap().unwrap();
    let recorded = facts.response.unwrap();
    assert_eq!(recorded.response, response);
    assert_eq!(
        recorded.metadata.hash_of_non_signers,
        hash_non_signers(&[operators[3].key.clone()])
    );
}

#[tokio::test]
async fn test_late_response_reverts() {
    let ledger = Arc::new(MemoryLedger::default());
    let operators = register_operators(&ledger, 4).await;
    let aggregator = writer_for(&ledger, LocalSigner::generate());
    let task = dispatch(&ledger, &aggregator, 2).await;

    ledger.advance_blocks(5).await;
    let response = TaskResponse::new(task.index, vec![9]);
    let signature = bundle(&ledger, &task, &[&operators[0]]).await;
    let err = aggregator
        .submit_aggregated_response(&task, &response, &signature)
        .await
        .unwrap_err();
    reverted_with(err, "response deadline passed");
}

#[tokio::test]
async fn test_insufficient_signed_stake_reverts() {
    let ledger = Arc::new(MemoryLedger::default());
    let operators = register_operators(&ledger, 4).await;
    let aggregator = writer_for(&ledger, LocalSigner::generate());
    let task = dispatch(&ledger, &aggregator, 10).await;

    // Two of four equal operators is 50%, below 67%.
    let response = TaskResponse::new(task.index, vec![9]);
    let signature = bundle(&ledger, &task, &[&operators[0], &operators[1]]).await;
    let err = aggregator
        .submit_aggregated_response(&task, &response, &signature)
        .await
        .unwrap_err();
    reverted_with(err, "quorum threshold not met");
}

#[tokio::test]
async fn test_aggregate_signature_binds_non_signers() {
    let ledger = Arc::new(MemoryLedger::new(MemoryLedgerConfig::default()).with_signature_verification());
    let (_, shares) = generate_threshold_keys(4, 3).unwrap();
    let mut keys = Vec::new();
    for (i, share) in shares.iter().enumerate() {
        let signer = LocalSigner::from_bytes(&[i as u8 + 1; 32]);
        ledger.set_delegated_stake(signer.address(), Stake(100)).await;
        let key = share.public_key().unwrap();
        writer_for(&ledger, signer)
            .register_operator(key.clone(), QuorumBitmap::single(QUORUM), format!("op-{i}:9000"))
            .await
            .unwrap();
        keys.push(key);
    }
    let aggregator = writer_for(&ledger, LocalSigner::generate());
    let task = dispatch(&ledger, &aggregator, 10).await;

    // Operators 0..3 sign; operator 3 does not.
    let response = TaskResponse::new(task.index, vec![9]);
    let bls = ThresholdSigner::task_responses();
    let signed: Vec<_> = shares[..3]
        .iter()
        .zip(&keys)
        .map(|(share, key)| (key.clone(), bls.sign_share(share, &response.digest()).unwrap()))
        .collect();
    let aggregate_signature = bls.aggregate(&response.digest(), &signed).unwrap();

    // Claiming everyone signed inflates the signed stake to the total.
    let forged = NonSignerStakesAndSignature {
        non_signer_pubkeys: vec![],
        quorum_total_stake: Stake(400),
        quorum_signed_stake: Stake(400),
        aggregate_signature: aggregate_signature.clone(),
        snapshot_block: task.created_block,
    };
    let err = aggregator
        .submit_aggregated_response(&task, &response, &forged)
        .await
        .unwrap_err();
    reverted_with(err, "invalid aggregate signature");

    let honest = NonSignerStakesAndSignature {
        non_signer_pubkeys: vec![keys[3].clone()],
        quorum_total_stake: Stake(400),
        quorum_signed_stake: Stake(300),
        aggregate_signature,
        snapshot_block: task.created_block,
    };
    let receipt = aggregator
        .submit_aggregated_response(&task, &response, &honest)
        .await
        .unwrap();
    assert_eq!(receipt.status, TxStatus::Success);
}

#[tokio::test]
async fn test_challenge_rules() {
    let ledger = Arc::new(MemoryLedger::default());
    let operators = register_operators(&ledger, 4).await;
    let aggregator = writer_for(&ledger, LocalSigner::generate());
    let challenger = writer_for(&ledger, LocalSigner::generate());
    let task = dispatch(&ledger, &aggregator, 10).await;

    let response = TaskResponse::new(task.index, vec![4]);
    let signature = bundle(&ledger, &task, &[&operators[3]]).await;
    aggregator
        .submit_aggregated_response(&task, &response, &signature)
        .await
        .unwrap();
    let metadata = ledger
        .task_facts(task.index)
        .await
        .unwrap()
        .unwrap()
        .response
        .unwrap()
        .metadata;

    let err = challenger
        .raise_challenge(&task, &response, &metadata, &[operators[0].key.clone()], &[])
        .await
        .unwrap_err();
    reverted_with(err, "non-signer hash mismatch");

    let non_signers = vec![operators[3].key.clone()];
    let receipt = challenger
        .raise_challenge(&task, &response, &metadata, &non_signers, &[])
        .await
        .unwrap();
    assert!(receipt.is_success());

    let retry = challenger
        .raise_challenge(&task, &response, &metadata, &non_signers, &[])
        .await
        .unwrap();
    assert_eq!(retry.tx_hash, receipt.tx_hash);

    let facts = ledger.task_facts(task.index).await.unwrap().unwrap();
    assert_eq!(facts.challenge.unwrap().challenger, challenger.address());
}

#[tokio::test]
async fn test_challenge_after_deadline_reverts() {
    let ledger = Arc::new(MemoryLedger::default());
    let operators = register_operators(&ledger, 4).await;
    let aggregator = writer_for(&ledger, LocalSigner::generate());
    let task = dispatch(&ledger, &aggregator, 3).await;

    let response = TaskResponse::new(task.index, vec![4]);
    let signature = bundle(&ledger, &task, &[&operators[3]]).await;
    aggregator
        .submit_aggregated_response(&task, &response, &signature)
        .await
        .unwrap();
    let facts = ledger.task_facts(task.index).await.unwrap().unwrap();
    let metadata = facts.response.unwrap().metadata;

    ledger.advance_blocks(100).await;
    let err = aggregator
        .raise_challenge(&task, &response, &metadata, &[operators[3].key.clone()], &[])
        .await
        .unwrap_err();
    reverted_with(err, "challenge period expired");
}

#[tokio::test]
async fn test_response_for_unknown_task_is_refused() {
    let ledger = Arc::new(MemoryLedger::default());
    let aggregator = writer_for(&ledger, LocalSigner::generate());
    let head = ledger.head_block().await.unwrap();
    let task = Task {
        index: avs_types::TaskIndex(42),
        input: vec![],
        quorum_number: QUORUM,
        quorum_threshold_percentage: 67,
        created_block: head,
        response_deadline: head,
        challenge_deadline: head,
    };
    let response = TaskResponse::new(task.index, vec![]);
    let signature = NonSignerStakesAndSignature {
        non_signer_pubkeys: vec![],
        quorum_total_stake: Stake::ZERO,
        quorum_signed_stake: Stake::ZERO,
        aggregate_signature: BlsSignature::new(vec![]),
        snapshot_block: head,
    };
    let err = aggregator
        .submit_aggregated_response(&task, &response, &signature)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::UnknownTask(_)));
}
