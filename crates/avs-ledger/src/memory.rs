//! Deterministic in-memory ledger.
//!
//! Implements [`Ledger`] with the contract rules the writer depends on:
//! task creation with fixed deadlines, one response per task accepted only
//! before its response deadline and only with a met quorum, one challenge per
//! task accepted only against the recorded response and before the challenge
//! deadline, and a registry whose history can be snapshotted at any block.
//!
//! Transactions are mined lazily: a pooled transaction is included when its
//! receipt has been polled `inclusion_delay` times and its nonce is the
//! sender's next. Each inclusion produces one block.
//!
//! Faults can be scripted per broadcast: forced send errors, silently dropped
//! broadcasts and forced reverts.

use crate::signer::verify_transaction;
use crate::{
    Call, Event, Ledger, OperatorStatus, Purpose, Receipt, ReceiptStatus, RecordedChallenge,
    RecordedResponse, Result, SendError, SignedTransaction, TaskFacts, TxStatus,
};
use async_trait::async_trait;
use avs_crypto::ThresholdSigner;
use avs_types::{
    hash_non_signers, Address, BlockNumber, OperatorInfo, OperatorSet, QuorumNumber, Stake, Task,
    TaskIndex, TaskResponseMetadata, TxHash,
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tokio::sync::Mutex;
use tracing::debug;

/// Cheapest gas limit the ledger accepts.
pub const MIN_GAS_LIMIT: u64 = 21_000;

#[derive(Debug, Clone)]
pub struct MemoryLedgerConfig {
    pub base_gas_price: u128,
    /// Receipt polls a transaction stays pending before it can be mined.
    pub inclusion_delay: u32,
    /// Blocks between a task's response deadline and its challenge deadline.
    pub challenge_window_blocks: u64,
    /// Minimum price increase for a same-nonce replacement.
    pub replacement_bump_percent: u32,
}

impl Default for MemoryLedgerConfig {
    fn default() -> Self {
        Self {
            base_gas_price: 1_000,
            inclusion_delay: 0,
            challenge_window_blocks: 10,
            replacement_bump_percent: 10,
        }
    }
}

/// One accepted broadcast, as seen by the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broadcast {
    pub from: Address,
    pub nonce: u64,
    pub gas_price: u128,
    pub tx_hash: TxHash,
    pub purpose: Purpose,
}

struct Pooled {
    tx: SignedTransaction,
    polls_remaining: u32,
}

/// Operator registry entry effective from `from_block`; `None` when removed.
type OperatorVersion = (u64, Option<OperatorInfo>);

struct State {
    head: u64,
    gas_price: u128,
    inclusion_delay: u32,
    nonces: HashMap<Address, u64>,
    mempool: HashMap<TxHash, Pooled>,
    receipts: HashMap<TxHash, Receipt>,
    operators: BTreeMap<Address, Vec<OperatorVersion>>,
    operator_status: HashMap<Address, OperatorStatus>,
    delegated: HashMap<Address, Stake>,
    tasks: Vec<TaskFacts>,
    send_faults: VecDeque<SendError>,
    drop_broadcasts: usize,
    forced_reverts: VecDeque<(Purpose, String)>,
    broadcasts: Vec<Broadcast>,
}

impl State {
    fn current_operator(&self, address: &Address) -> Option<&OperatorInfo> {
        self.operators
            .get(address)
            .and_then(|versions| versions.last())
            .and_then(|(_, info)| info.as_ref())
    }

    fn snapshot(&self, block: u64, quorum: QuorumNumber) -> Vec<OperatorInfo> {
        self.operators
            .values()
            .filter_map(|versions| {
                versions
                    .iter()
                    .rev()
                    .find(|(from, _)| *from <= block)
                    .and_then(|(_, info)| info.clone())
            })
            .filter(|info| info.quorum_bitmap.contains(quorum))
            .collect()
    }

    fn push_operator_version(&mut self, address: Address, block: u64, info: Option<OperatorInfo>) {
        let versions = self.operators.entry(address).or_default();
        // Several changes in one block collapse into the last one.
        if let Some(last) = versions.last_mut() {
            if last.0 == block {
                last.1 = info;
                return;
            }
        }
        versions.push((block, info));
    }
}

pub struct MemoryLedger {
    config: MemoryLedgerConfig,
    verify_signatures: bool,
    state: Mutex<State>,
}

impl MemoryLedger {
    pub fn new(config: MemoryLedgerConfig) -> Self {
        let state = State {
            head: 0,
            gas_price: config.base_gas_price,
            inclusion_delay: config.inclusion_delay,
            nonces: HashMap::new(),
            mempool: HashMap::new(),
            receipts: HashMap::new(),
            operators: BTreeMap::new(),
            operator_status: HashMap::new(),
            delegated: HashMap::new(),
            tasks: Vec::new(),
            send_faults: VecDeque::new(),
            drop_broadcasts: 0,
            forced_reverts: VecDeque::new(),
            broadcasts: Vec::new(),
        };
        Self {
            config,
            verify_signatures: false,
            state: Mutex::new(state),
        }
    }

    /// Verify each response's aggregate signature against the summed keys
    /// of the snapshot operators not listed as non-signers.
    pub fn with_signature_verification(mut self) -> Self {
        self.verify_signatures = true;
        self
    }

    pub async fn advance_blocks(&self, blocks: u64) -> BlockNumber {
        let mut state = self.state.lock().await;
        state.head += blocks;
        BlockNumber::new(state.head)
    }

    pub async fn set_delegated_stake(&self, address: Address, stake: Stake) {
        self.state.lock().await.delegated.insert(address, stake);
    }

    pub async fn set_gas_price(&self, price: u128) {
        self.state.lock().await.gas_price = price;
    }

    pub async fn set_inclusion_delay(&self, polls: u32) {
        self.state.lock().await.inclusion_delay = polls;
    }

    /// Fail the next broadcast with `error` before any validation.
    pub async fn inject_send_error(&self, error: SendError) {
        self.state.lock().await.send_faults.push_back(error);
    }

    /// Accept the next `count` broadcasts but never pool them.
    pub async fn drop_next_broadcasts(&self, count: usize) {
        self.state.lock().await.drop_broadcasts += count;
    }

    /// Revert the next included transaction with this purpose.
    pub async fn revert_next(&self, purpose: Purpose, reason: impl Into<String>) {
        self.state
            .lock()
            .await
            .forced_reverts
            .push_back((purpose, reason.into()));
    }

    /// Every broadcast accepted so far, in arrival order.
    pub async fn broadcasts(&self) -> Vec<Broadcast> {
        self.state.lock().await.broadcasts.clone()
    }

    /// Receipts of included transactions from `address`, ordered by nonce.
    pub async fn receipts_from(&self, address: &Address) -> Vec<Receipt> {
        let state = self.state.lock().await;
        let mut receipts: Vec<Receipt> = state
            .receipts
            .values()
            .filter(|r| r.from == *address)
            .cloned()
            .collect();
        receipts.sort_by_key(|r| r.nonce);
        receipts
    }

    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.mempool.len()
    }

    /// Include every pooled transaction whose nonce is next in line,
    /// regardless of inclusion delay.
    pub async fn mine_pending(&self) -> Vec<Receipt> {
        let mut state = self.state.lock().await;
        let mut mined = Vec::new();
        loop {
            let ready = state
                .mempool
                .iter()
                .find(|(_, p)| {
                    state.nonces.get(&p.tx.from()).copied().unwrap_or(0) == p.tx.nonce()
                })
                .map(|(hash, _)| *hash);
            match ready {
                Some(hash) => {
                    if let Some(receipt) = self.include(&mut state, hash) {
                        mined.push(receipt);
                    }
                }
                None => break,
            }
        }
        mined
    }

    /// Forget every pooled transaction, as if the mempool was flushed.
    pub async fn clear_mempool(&self) {
        self.state.lock().await.mempool.clear();
    }

    fn include(&self, state: &mut State, hash: TxHash) -> Option<Receipt> {
        let pooled = state.mempool.remove(&hash)?;
        let tx = pooled.tx;
        let from = tx.from();
        let nonce = tx.nonce();

        state.head += 1;
        let block = state.head;
        state.nonces.insert(from, nonce + 1);
        // Anything else still pooled at this nonce can never be included.
        state
            .mempool
            .retain(|_, p| !(p.tx.from() == from && p.tx.nonce() == nonce));

        let purpose = tx.unsigned.call.purpose();
        let forced = state
            .forced_reverts
            .iter()
            .position(|(p, _)| *p == purpose)
            .and_then(|i| state.forced_reverts.remove(i));

        let (status, events) = match forced {
            Some((_, reason)) => (TxStatus::Reverted(reason), Vec::new()),
            None => match self.execute(state, &tx, hash, block) {
                Ok(events) => (TxStatus::Success, events),
                Err(reason) => (TxStatus::Reverted(reason), Vec::new()),
            },
        };

        debug!(
            tx_hash = %hash,
            block,
            nonce,
            purpose = %purpose,
            status = ?status,
            "⛏️ Transaction included"
        );

        let receipt = Receipt {
            tx_hash: hash,
            from,
            nonce,
            block: BlockNumber::new(block),
            status,
            events,
        };
        state.receipts.insert(hash, receipt.clone());
        Some(receipt)
    }

    fn execute(
        &self,
        state: &mut State,
        tx: &SignedTransaction,
        hash: TxHash,
        block: u64,
    ) -> std::result::Result<Vec<Event>, String> {
        let sender = tx.from();
        match &tx.unsigned.call {
            Call::RegisterOperator {
                bls_pubkey,
                quorum_bitmap,
                socket,
            } => {
                if state.current_operator(&sender).is_some() {
                    return Err("operator already registered".into());
                }
                if quorum_bitmap.is_empty() {
                    return Err("empty quorum bitmap".into());
                }
                let key_taken = state.operators.keys().any(|addr| {
                    state
                        .current_operator(addr)
                        .map(|info| info.bls_pubkey == *bls_pubkey)
                        .unwrap_or(false)
                });
                if key_taken {
                    return Err("BLS public key already registered".into());
                }
                let stake = state.delegated.get(&sender).copied().unwrap_or_default();
                if stake == Stake::ZERO {
                    return Err("operator has no delegated stake".into());
                }
                let info = OperatorInfo {
                    address: sender,
                    bls_pubkey: bls_pubkey.clone(),
                    stake,
                    quorum_bitmap: *quorum_bitmap,
                    socket: socket.clone(),
                };
                state.push_operator_version(sender, block, Some(info));
                state
                    .operator_status
                    .insert(sender, OperatorStatus::Registered { tx_hash: hash });
                Ok(vec![Event::OperatorRegistered {
                    address: sender,
                    quorum_bitmap: *quorum_bitmap,
                }])
            }

            Call::DeregisterOperator {
                address,
                quorum_bitmap,
                bls_pubkey,
            } => {
                if *address != sender {
                    return Err("only the operator may deregister itself".into());
                }
                let info = state
                    .current_operator(address)
                    .cloned()
                    .ok_or("operator not registered")?;
                if info.bls_pubkey != *bls_pubkey {
                    return Err("BLS public key does not match registration".into());
                }
                let remaining = info.quorum_bitmap.without(*quorum_bitmap);
                if remaining.is_empty() {
                    state.push_operator_version(*address, block, None);
                    state
                        .operator_status
                        .insert(*address, OperatorStatus::Deregistered { tx_hash: hash });
                } else {
                    let updated = OperatorInfo {
                        quorum_bitmap: remaining,
                        ..info
                    };
                    state.push_operator_version(*address, block, Some(updated));
                }
                Ok(vec![Event::OperatorDeregistered {
                    address: *address,
                    quorum_bitmap: *quorum_bitmap,
                }])
            }

            Call::UpdateStakes { addresses } => {
                let mut updated = Vec::new();
                for address in addresses {
                    let Some(info) = state.current_operator(address).cloned() else {
                        continue;
                    };
                    let stake = state.delegated.get(address).copied().unwrap_or_default();
                    if stake != info.stake {
                        state.push_operator_version(
                            *address,
                            block,
                            Some(OperatorInfo { stake, ..info }),
                        );
                        updated.push(*address);
                    }
                }
                Ok(vec![Event::StakesUpdated { addresses: updated }])
            }

            Call::CreateNewTask {
                input,
                quorum_number,
                quorum_threshold_percentage,
                response_deadline,
            } => {
                if response_deadline.height() < block {
                    return Err("response deadline already passed".into());
                }
                if *quorum_threshold_percentage == 0 || *quorum_threshold_percentage > 100 {
                    return Err("invalid quorum threshold".into());
                }
                let index = u32::try_from(state.tasks.len())
                    .map_err(|_| "task index space exhausted".to_string())?;
                let task = Task {
                    index: TaskIndex(index),
                    input: input.clone(),
                    quorum_number: *quorum_number,
                    quorum_threshold_percentage: *quorum_threshold_percentage,
                    created_block: BlockNumber::new(block),
                    response_deadline: *response_deadline,
                    challenge_deadline: BlockNumber::new(
                        response_deadline.height() + self.config.challenge_window_blocks,
                    ),
                };
                state.tasks.push(TaskFacts {
                    task: task.clone(),
                    response: None,
                    challenge: None,
                });
                Ok(vec![Event::NewTaskCreated(task)])
            }

            Call::RespondToTask {
                task,
                response,
                non_signer_stakes_and_signature: bundle,
            } => {
                let facts = state
                    .tasks
                    .get(task.index.0 as usize)
                    .ok_or("task does not exist")?;
                if facts.task != *task {
                    return Err("task does not match recorded task".into());
                }
                if response.task_index != task.index {
                    return Err("response references a different task".into());
                }
                if facts.response.is_some() {
                    return Err("task already responded".into());
                }
                if BlockNumber::new(block) > task.response_deadline {
                    return Err("response deadline passed".into());
                }
                if bundle.snapshot_block != task.created_block {
                    return Err("snapshot block does not match task creation block".into());
                }

                let snapshot = state.snapshot(task.created_block.height(), task.quorum_number);
                let mut total = Stake::ZERO;
                for op in &snapshot {
                    total = total.checked_add(op.stake).ok_or("stake overflow")?;
                }
                let mut seen = HashSet::new();
                let mut non_signer_stake = Stake::ZERO;
                for key in &bundle.non_signer_pubkeys {
                    if !seen.insert(key.clone()) {
                        return Err("duplicate non-signer".into());
                    }
                    let op = snapshot
                        .iter()
                        .find(|op| op.bls_pubkey == *key)
                        .ok_or("non-signer is not in the operator set")?;
                    non_signer_stake = non_signer_stake
                        .checked_add(op.stake)
                        .ok_or("stake overflow")?;
                }
                let signed = Stake(total.0 - non_signer_stake.0);
                if bundle.quorum_total_stake != total || bundle.quorum_signed_stake != signed {
                    return Err("stake totals do not match operator set".into());
                }
                if !signed.meets_threshold(total, task.quorum_threshold_percentage) {
                    return Err("quorum threshold not met".into());
                }
                if self.verify_signatures {
                    let signer_keys: Vec<_> = snapshot
                        .iter()
                        .filter(|op| !seen.contains(&op.bls_pubkey))
                        .map(|op| op.bls_pubkey.clone())
                        .collect();
                    let valid = ThresholdSigner::task_responses()
                        .verify_aggregate(
                            &signer_keys,
                            &response.digest(),
                            &bundle.aggregate_signature,
                        )
                        .unwrap_or(false);
                    if !valid {
                        return Err("invalid aggregate signature".into());
                    }
                }

                let metadata = TaskResponseMetadata {
                    task_responded_block: BlockNumber::new(block),
                    hash_of_non_signers: hash_non_signers(&bundle.non_signer_pubkeys),
                };
                let facts = &mut state.tasks[task.index.0 as usize];
                facts.response = Some(RecordedResponse {
                    response: response.clone(),
                    metadata: metadata.clone(),
                    non_signer_pubkeys: bundle.non_signer_pubkeys.clone(),
                    tx_hash: hash,
                });
                Ok(vec![Event::TaskResponded {
                    task_index: task.index,
                    metadata,
                }])
            }

            Call::RaiseChallenge {
                task,
                response,
                metadata,
                non_signer_pubkeys,
                proof: _,
            } => {
                let facts = state
                    .tasks
                    .get_mut(task.index.0 as usize)
                    .ok_or("task does not exist")?;
                if facts.task != *task {
                    return Err("task does not match recorded task".into());
                }
                let recorded = facts.response.as_ref().ok_or("task not responded")?;
                if facts.challenge.is_some() {
                    return Err("task already challenged".into());
                }
                if BlockNumber::new(block) > task.challenge_deadline {
                    return Err("challenge period expired".into());
                }
                if recorded.response != *response {
                    return Err("response does not match recorded response".into());
                }
                if recorded.metadata != *metadata {
                    return Err("metadata does not match recorded metadata".into());
                }
                if hash_non_signers(non_signer_pubkeys) != metadata.hash_of_non_signers {
                    return Err("non-signer hash mismatch".into());
                }
                facts.challenge = Some(RecordedChallenge {
                    challenger: sender,
                    block: BlockNumber::new(block),
                    tx_hash: hash,
                });
                Ok(vec![Event::ChallengeRaised {
                    task_index: task.index,
                    challenger: sender,
                }])
            }
        }
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new(MemoryLedgerConfig::default())
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn head_block(&self) -> Result<BlockNumber> {
        Ok(BlockNumber::new(self.state.lock().await.head))
    }

    async fn next_nonce(&self, address: &Address) -> Result<u64> {
        Ok(self
            .state
            .lock()
            .await
            .nonces
            .get(address)
            .copied()
            .unwrap_or(0))
    }

    async fn gas_price(&self) -> Result<u128> {
        Ok(self.state.lock().await.gas_price)
    }

    async fn send_transaction(
        &self,
        tx: SignedTransaction,
    ) -> std::result::Result<TxHash, SendError> {
        let mut state = self.state.lock().await;
        if let Some(fault) = state.send_faults.pop_front() {
            return Err(fault);
        }
        if !verify_transaction(&tx) {
            return Err(SendError::Rejected("invalid signature".into()));
        }
        if tx.unsigned.gas_limit < MIN_GAS_LIMIT {
            return Err(SendError::Rejected("intrinsic gas too low".into()));
        }
        let hash = tx.hash().map_err(|e| SendError::Rejected(e.to_string()))?;
        if state.mempool.contains_key(&hash) || state.receipts.contains_key(&hash) {
            return Err(SendError::AlreadyKnown);
        }

        let from = tx.from();
        let nonce = tx.nonce();
        if nonce < state.nonces.get(&from).copied().unwrap_or(0) {
            return Err(SendError::NonceTooLow);
        }
        if tx.unsigned.gas_price < state.gas_price {
            return Err(SendError::Underpriced);
        }

        let replaced = state
            .mempool
            .iter()
            .find(|(_, p)| p.tx.from() == from && p.tx.nonce() == nonce)
            .map(|(h, p)| (*h, p.tx.unsigned.gas_price));
        if let Some((old_hash, old_price)) = replaced {
            let required =
                old_price.saturating_mul(100 + self.config.replacement_bump_percent as u128);
            if tx.unsigned.gas_price.saturating_mul(100) < required {
                return Err(SendError::Underpriced);
            }
            state.mempool.remove(&old_hash);
        }

        state.broadcasts.push(Broadcast {
            from,
            nonce,
            gas_price: tx.unsigned.gas_price,
            tx_hash: hash,
            purpose: tx.unsigned.call.purpose(),
        });

        if state.drop_broadcasts > 0 {
            state.drop_broadcasts -= 1;
            return Ok(hash);
        }

        let polls_remaining = state.inclusion_delay;
        state.mempool.insert(
            hash,
            Pooled {
                tx,
                polls_remaining,
            },
        );
        Ok(hash)
    }

    async fn get_receipt(&self, hash: &TxHash) -> Result<ReceiptStatus> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        if let Some(receipt) = state.receipts.get(hash) {
            return Ok(ReceiptStatus::Confirmed(receipt.clone()));
        }
        let ready = match state.mempool.get_mut(hash) {
            None => return Ok(ReceiptStatus::NotFound),
            Some(pooled) if pooled.polls_remaining > 0 => {
                pooled.polls_remaining -= 1;
                false
            }
            Some(pooled) => {
                let from = pooled.tx.from();
                let nonce = pooled.tx.nonce();
                state.nonces.get(&from).copied().unwrap_or(0) == nonce
            }
        };
        if !ready {
            return Ok(ReceiptStatus::Pending);
        }
        match self.include(state, *hash) {
            Some(receipt) => Ok(ReceiptStatus::Confirmed(receipt)),
            None => Ok(ReceiptStatus::NotFound),
        }
    }

    async fn operator_set_snapshot(
        &self,
        block: BlockNumber,
        quorum: QuorumNumber,
    ) -> Result<OperatorSet> {
        let state = self.state.lock().await;
        let operators = state.snapshot(block.height(), quorum);
        Ok(OperatorSet::new(block, quorum, operators)?)
    }

    async fn task_facts(&self, index: TaskIndex) -> Result<Option<TaskFacts>> {
        Ok(self.state.lock().await.tasks.get(index.0 as usize).cloned())
    }

    async fn operator_registered(&self, address: &Address) -> Result<OperatorStatus> {
        Ok(self
            .state
            .lock()
            .await
            .operator_status
            .get(address)
            .cloned()
            .unwrap_or(OperatorStatus::NeverRegistered))
    }
}
