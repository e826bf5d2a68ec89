//! Nonce-serialized transaction submission.
//!
//! One [`SubmissionEngine`] exists per sending identity. Every write goes
//! through its nonce gate, which stays locked from nonce assignment until the
//! transaction is confirmed or abandoned. Nonces are therefore gapless and
//! a nonce is never used by two different payloads from this process.
//!
//! Re-pricing keeps the original nonce: the replacement supersedes the
//! earlier broadcast in the mempool instead of queueing behind it.

use crate::{
    Call, Ledger, LedgerError, Purpose, Receipt, ReceiptStatus, Result, SendError, TxSigner,
    TxStatus, UnsignedTransaction,
};
use avs_types::{Address, TxHash};
use backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionConfig {
    /// Broadcast attempts (initial send plus re-priced replacements).
    pub max_attempts: u32,
    pub gas_limit: u64,
    /// Added on top of the ledger's gas price estimate.
    pub gas_price_margin_percent: u32,
    /// Increase applied to the previous price when re-pricing.
    pub price_bump_percent: u32,
    pub initial_poll_interval_ms: u64,
    pub max_poll_interval_ms: u64,
    /// Upper bound for a single receipt query.
    pub poll_timeout_ms: u64,
    /// How long one broadcast may stay pending before it is re-priced.
    pub max_attempt_wait_ms: u64,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            gas_limit: 1_000_000,
            gas_price_margin_percent: 20,
            price_bump_percent: 15,
            initial_poll_interval_ms: 100,
            max_poll_interval_ms: 2_000,
            poll_timeout_ms: 5_000,
            max_attempt_wait_ms: 30_000,
        }
    }
}

/// A transaction owned by the engine while it is in flight.
#[derive(Debug, Clone)]
pub struct PendingTransaction {
    pub purpose: Purpose,
    pub call: Call,
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub attempts: u32,
    pub last_error: Option<String>,
    /// Every hash broadcast for this payload, with the nonce it used.
    pub broadcasts: Vec<(TxHash, u64)>,
}

impl PendingTransaction {
    fn new(purpose: Purpose, call: Call, nonce: u64, gas_limit: u64) -> Self {
        Self {
            purpose,
            call,
            nonce,
            gas_price: 0,
            gas_limit,
            attempts: 0,
            last_error: None,
            broadcasts: Vec::new(),
        }
    }

    fn record_broadcast(&mut self, hash: TxHash) {
        if !self.broadcasts.iter().any(|(h, _)| *h == hash) {
            self.broadcasts.push((hash, self.nonce));
        }
    }
}

/// Nonce bookkeeping guarded by the gate. `None` means the in-memory value is
/// not trusted and must be re-read from the ledger before use.
#[derive(Debug, Default)]
struct NonceState {
    next: Option<u64>,
}

enum Inclusion {
    Confirmed(Receipt),
    Dropped,
    TimedOut(String),
}

enum PollError {
    Pending,
    Dropped,
    Query(LedgerError),
}

enum Pricing {
    Estimate,
    Bump,
    Keep,
}

pub struct SubmissionEngine {
    ledger: Arc<dyn Ledger>,
    signer: Arc<dyn TxSigner>,
    config: SubmissionConfig,
    nonce: Mutex<NonceState>,
}

impl SubmissionEngine {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        signer: Arc<dyn TxSigner>,
        config: SubmissionConfig,
    ) -> Self {
        Self {
            ledger,
            signer,
            config,
            nonce: Mutex::new(NonceState::default()),
        }
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn config(&self) -> &SubmissionConfig {
        &self.config
    }

    /// Read the authoritative next nonce from the ledger. Called on startup;
    /// `submit` also does this lazily whenever the local value is unsynced.
    pub async fn reconcile(&self) -> Result<u64> {
        let mut state = self.nonce.lock().await;
        self.reconcile_locked(&mut state).await
    }

    /// Next nonce as currently known locally, if synced.
    pub async fn local_nonce(&self) -> Option<u64> {
        self.nonce.lock().await.next
    }

    async fn reconcile_locked(&self, state: &mut NonceState) -> Result<u64> {
        let address = self.address();
        let next = self
            .ledger
            .next_nonce(&address)
            .await
            .map_err(|e| LedgerError::NonceReconciliation(e.to_string()))?;
        if state.next != Some(next) {
            debug!(
                sender = %address,
                local = ?state.next,
                ledger = next,
                "🔄 Nonce reconciled with ledger"
            );
        }
        state.next = Some(next);
        Ok(next)
    }

    fn with_margin(&self, price: u128) -> u128 {
        price.saturating_mul(100 + self.config.gas_price_margin_percent as u128) / 100
    }

    fn bumped(&self, price: u128) -> u128 {
        let bumped =
            price.saturating_mul(100 + self.config.price_bump_percent as u128) / 100;
        bumped.max(price.saturating_add(1))
    }

    /// Submit `call` and wait for its receipt.
    ///
    /// Transient and stale failures are absorbed here. A reverted receipt or
    /// a rejected payload is returned immediately; exhausting `max_attempts`
    /// yields [`LedgerError::Abandoned`].
    pub async fn submit(&self, purpose: Purpose, call: Call) -> Result<Receipt> {
        let mut state = self.nonce.lock().await;
        let nonce = match state.next {
            Some(n) => n,
            None => self.reconcile_locked(&mut state).await?,
        };

        let mut pending = PendingTransaction::new(purpose, call, nonce, self.config.gas_limit);
        let mut pricing = Pricing::Estimate;

        while pending.attempts < self.config.max_attempts {
            pending.attempts += 1;
            pending.gas_price = match pricing {
                Pricing::Estimate => match self.ledger.gas_price().await {
                    Ok(price) => self.with_margin(price),
                    Err(e) if e.is_transient() => {
                        warn!(purpose = %purpose, error = %e, "Gas price estimate failed");
                        pending.last_error = Some(e.to_string());
                        tokio::time::sleep(Duration::from_millis(
                            self.config.initial_poll_interval_ms,
                        ))
                        .await;
                        continue;
                    }
                    Err(e) => return Err(e),
                },
                Pricing::Bump => self.bumped(pending.gas_price),
                Pricing::Keep => pending.gas_price,
            };

            let signed = self.signer.sign(UnsignedTransaction {
                from: self.address(),
                nonce: pending.nonce,
                gas_price: pending.gas_price,
                gas_limit: pending.gas_limit,
                call: pending.call.clone(),
            })?;
            let hash = signed.hash()?;

            match self.ledger.send_transaction(signed).await {
                Ok(hash) => {
                    pending.record_broadcast(hash);
                    info!(
                        purpose = %purpose,
                        tx_hash = %hash,
                        nonce = pending.nonce,
                        gas_price = pending.gas_price,
                        attempt = pending.attempts,
                        "📤 Transaction broadcast"
                    );
                }
                Err(SendError::AlreadyKnown) => {
                    pending.record_broadcast(hash);
                    debug!(tx_hash = %hash, "Transaction already known, polling");
                }
                Err(SendError::Underpriced) => {
                    warn!(
                        purpose = %purpose,
                        nonce = pending.nonce,
                        gas_price = pending.gas_price,
                        "💸 Transaction underpriced, re-pricing"
                    );
                    pending.last_error = Some(SendError::Underpriced.to_string());
                    pricing = Pricing::Bump;
                    continue;
                }
                Err(SendError::NonceTooLow) => {
                    pending.last_error = Some(SendError::NonceTooLow.to_string());
                    if let Some(receipt) = self.find_confirmed(&pending).await? {
                        return self.finish(&mut state, &pending, receipt);
                    }
                    let next = self.reconcile_locked(&mut state).await?;
                    warn!(
                        purpose = %purpose,
                        stale_nonce = pending.nonce,
                        next_nonce = next,
                        "⚠️ Nonce consumed elsewhere, continuing with reconciled nonce"
                    );
                    pending.nonce = next;
                    pricing = Pricing::Keep;
                    continue;
                }
                Err(SendError::Unavailable(reason)) => {
                    warn!(purpose = %purpose, %reason, "Ledger unavailable during broadcast");
                    pending.last_error = Some(reason);
                    pricing = Pricing::Keep;
                    tokio::time::sleep(Duration::from_millis(
                        self.config.initial_poll_interval_ms,
                    ))
                    .await;
                    continue;
                }
                Err(SendError::Rejected(reason)) => {
                    warn!(purpose = %purpose, %reason, "❌ Transaction rejected");
                    return Err(LedgerError::Rejected { purpose, reason });
                }
            }

            match self.await_inclusion(&pending).await {
                Inclusion::Confirmed(receipt) => return self.finish(&mut state, &pending, receipt),
                Inclusion::Dropped => {
                    warn!(
                        purpose = %purpose,
                        nonce = pending.nonce,
                        "🕳️ Transaction dropped from mempool, re-pricing"
                    );
                    pending.last_error = Some("dropped from mempool".to_string());
                    pricing = Pricing::Bump;
                }
                Inclusion::TimedOut(reason) => {
                    warn!(
                        purpose = %purpose,
                        nonce = pending.nonce,
                        wait_ms = self.config.max_attempt_wait_ms,
                        "⏳ Inclusion wait exceeded, re-pricing"
                    );
                    pending.last_error = Some(reason);
                    pricing = Pricing::Bump;
                }
            }
        }

        // The nonce may or may not have been consumed by a late inclusion.
        state.next = None;
        let last_error = pending
            .last_error
            .unwrap_or_else(|| "no attempt made".to_string());
        warn!(
            purpose = %purpose,
            attempts = pending.attempts,
            %last_error,
            "🛑 Transaction abandoned"
        );
        Err(LedgerError::Abandoned {
            purpose,
            attempts: pending.attempts,
            last_error,
        })
    }

    fn finish(
        &self,
        state: &mut NonceState,
        pending: &PendingTransaction,
        receipt: Receipt,
    ) -> Result<Receipt> {
        // Included transactions consume their nonce whether or not they revert.
        state.next = Some(receipt.nonce + 1);
        match &receipt.status {
            TxStatus::Success => {
                info!(
                    purpose = %pending.purpose,
                    tx_hash = %receipt.tx_hash,
                    block = %receipt.block,
                    nonce = receipt.nonce,
                    "✅ Transaction confirmed"
                );
                Ok(receipt)
            }
            TxStatus::Reverted(reason) => {
                warn!(
                    purpose = %pending.purpose,
                    tx_hash = %receipt.tx_hash,
                    %reason,
                    "❌ Transaction reverted"
                );
                Err(LedgerError::Reverted {
                    purpose: pending.purpose,
                    tx_hash: receipt.tx_hash,
                    reason: reason.clone(),
                })
            }
        }
    }

    async fn find_confirmed(&self, pending: &PendingTransaction) -> Result<Option<Receipt>> {
        for (hash, _) in &pending.broadcasts {
            if let ReceiptStatus::Confirmed(receipt) = self.ledger.get_receipt(hash).await? {
                return Ok(Some(receipt));
            }
        }
        Ok(None)
    }

    async fn poll_once(&self, pending: &PendingTransaction) -> std::result::Result<Receipt, PollError> {
        let timeout = Duration::from_millis(self.config.poll_timeout_ms);
        let mut any_pending = false;
        for (hash, _) in &pending.broadcasts {
            match tokio::time::timeout(timeout, self.ledger.get_receipt(hash)).await {
                Ok(Ok(ReceiptStatus::Confirmed(receipt))) => return Ok(receipt),
                Ok(Ok(ReceiptStatus::Pending)) => any_pending = true,
                Ok(Ok(ReceiptStatus::NotFound)) => {}
                Ok(Err(e)) => return Err(PollError::Query(e)),
                Err(_) => {
                    return Err(PollError::Query(LedgerError::Unavailable(format!(
                        "receipt query for {} timed out",
                        hash
                    ))))
                }
            }
        }
        if any_pending {
            Err(PollError::Pending)
        } else {
            Err(PollError::Dropped)
        }
    }

    async fn await_inclusion(&self, pending: &PendingTransaction) -> Inclusion {
        let backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(self.config.initial_poll_interval_ms),
            current_interval: Duration::from_millis(self.config.initial_poll_interval_ms),
            max_interval: Duration::from_millis(self.config.max_poll_interval_ms),
            max_elapsed_time: Some(Duration::from_millis(self.config.max_attempt_wait_ms)),
            ..Default::default()
        };

        let poll = || async {
            match self.poll_once(pending).await {
                Ok(receipt) => Ok(receipt),
                Err(PollError::Dropped) => Err(backoff::Error::permanent(PollError::Dropped)),
                Err(e) => Err(backoff::Error::transient(e)),
            }
        };

        match backoff::future::retry(backoff, poll).await {
            Ok(receipt) => Inclusion::Confirmed(receipt),
            Err(PollError::Dropped) => Inclusion::Dropped,
            Err(PollError::Pending) => Inclusion::TimedOut("inclusion wait exceeded".to_string()),
            Err(PollError::Query(e)) => Inclusion::TimedOut(e.to_string()),
        }
    }
}
