//! Operator registry writer with a read-mostly snapshot cache.
//!
//! Writes go through the [`Writer`] and therefore through the sending
//! identity's nonce gate. Reads never wait for in-flight writes: they see the
//! operator set as of the last confirmed registry change this process knows
//! about, or any explicitly requested historical block.

use crate::{RegistryError, Result};
use avs_ledger::{Ledger, OperatorStatus, Receipt, Writer};
use avs_types::{Address, BlockNumber, BlsPublicKey, OperatorSet, QuorumBitmap, QuorumNumber};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Snapshots kept in memory; the oldest blocks are evicted first.
    pub max_cached_snapshots: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_cached_snapshots: 256,
        }
    }
}

pub struct OperatorRegistry {
    ledger: Arc<dyn Ledger>,
    writer: Arc<dyn Writer>,
    config: RegistryConfig,
    snapshots: RwLock<BTreeMap<(BlockNumber, QuorumNumber), Arc<OperatorSet>>>,
    latest_confirmed: RwLock<BlockNumber>,
}

impl OperatorRegistry {
    pub fn new(ledger: Arc<dyn Ledger>, writer: Arc<dyn Writer>, config: RegistryConfig) -> Self {
        Self {
            ledger,
            writer,
            config,
            snapshots: RwLock::new(BTreeMap::new()),
            latest_confirmed: RwLock::new(BlockNumber::GENESIS),
        }
    }

    pub async fn register_operator(
        &self,
        bls_pubkey: BlsPublicKey,
        quorum_bitmap: QuorumBitmap,
        socket: String,
    ) -> Result<Receipt> {
        let receipt = self
            .writer
            .register_operator(bls_pubkey, quorum_bitmap, socket)
            .await?;
        self.note_confirmed(receipt.block).await;
        info!(
            tx_hash = %receipt.tx_hash,
            block = %receipt.block,
            quorum_bitmap = quorum_bitmap.0,
            "🧾 Operator registered"
        );
        Ok(receipt)
    }

    pub async fn deregister_operator(
        &self,
        address: Address,
        quorum_bitmap: QuorumBitmap,
        bls_pubkey: BlsPublicKey,
    ) -> Result<Receipt> {
        if let OperatorStatus::NeverRegistered = self.ledger.operator_registered(&address).await? {
            return Err(RegistryError::NotRegistered(address));
        }
        let receipt = self
            .writer
            .deregister_operator(address, quorum_bitmap, bls_pubkey)
            .await?;
        self.note_confirmed(receipt.block).await;
        info!(
            operator = %address,
            tx_hash = %receipt.tx_hash,
            block = %receipt.block,
            "👋 Operator deregistered"
        );
        Ok(receipt)
    }

    pub async fn update_stakes(&self, addresses: Vec<Address>) -> Result<Receipt> {
        let count = addresses.len();
        let receipt = self.writer.update_stakes(addresses).await?;
        self.note_confirmed(receipt.block).await;
        info!(
            operators = count,
            tx_hash = %receipt.tx_hash,
            block = %receipt.block,
            "⚖️ Stakes updated"
        );
        Ok(receipt)
    }

    /// Operator set for `quorum` as of `block`.
    ///
    /// Snapshots at or below the ledger head are immutable history and are
    /// cached; later blocks are read through without caching.
    pub async fn snapshot_at(
        &self,
        block: BlockNumber,
        quorum: QuorumNumber,
    ) -> Result<Arc<OperatorSet>> {
        if let Some(set) = self.snapshots.read().await.get(&(block, quorum)) {
            return Ok(set.clone());
        }

        let set = Arc::new(self.ledger.operator_set_snapshot(block, quorum).await?);
        let head = self.ledger.head_block().await?;
        if block <= head {
            let mut cache = self.snapshots.write().await;
            cache.insert((block, quorum), set.clone());
            while cache.len() > self.config.max_cached_snapshots {
                cache.pop_first();
            }
        }
        debug!(
            block = %block,
            quorum = quorum.0,
            operators = set.len(),
            total_stake = %set.total_stake(),
            "Operator set snapshot loaded"
        );
        Ok(set)
    }

    /// Operator set as of the last confirmed registry change seen here.
    pub async fn latest_snapshot(&self, quorum: QuorumNumber) -> Result<Arc<OperatorSet>> {
        let block = *self.latest_confirmed.read().await;
        self.snapshot_at(block, quorum).await
    }

    pub async fn latest_confirmed_block(&self) -> BlockNumber {
        *self.latest_confirmed.read().await
    }

    /// Move the confirmed watermark forward, e.g. after observing registry
    /// changes made by other identities.
    pub async fn note_confirmed(&self, block: BlockNumber) {
        let mut latest = self.latest_confirmed.write().await;
        if block > *latest {
            *latest = block;
        }
    }

    pub async fn cached_snapshots(&self) -> usize {
        self.snapshots.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avs_crypto::generate_threshold_keys;
    use avs_ledger::{
        LedgerWriter, LocalSigner, MemoryLedger, SubmissionConfig, SubmissionEngine, TxSigner,
    };
    use avs_types::Stake;

    const QUORUM: QuorumNumber = QuorumNumber(0);

    fn registry_for(ledger: &Arc<MemoryLedger>, signer: LocalSigner) -> OperatorRegistry {
        let config = SubmissionConfig {
            initial_poll_interval_ms: 1,
            max_poll_interval_ms: 5,
            ..Default::default()
        };
        let engine = Arc::new(SubmissionEngine::new(ledger.clone(), Arc::new(signer), config));
        let writer = Arc::new(LedgerWriter::new(engine, ledger.clone(), 67));
        OperatorRegistry::new(ledger.clone(), writer, RegistryConfig::default())
    }

    #[tokio::test]
    async fn test_register_then_snapshot() {
        let ledger = Arc::new(MemoryLedger::default());
        let (group, _) = generate_threshold_keys(2, 2).unwrap();

        let mut registries = Vec::new();
        for i in 0..2u8 {
            let signer = LocalSigner::from_bytes(&[i + 10; 32]);
            ledger.set_delegated_stake(signer.address(), Stake(10 * (i as u128 + 1))).await;
            let registry = registry_for(&ledger, signer);
            registry
                .register_operator(
                    group.public_key_share(i as u64).unwrap(),
                    QuorumBitmap::single(QUORUM),
                    "localhost:9000".into(),
                )
                .await
                .unwrap();
            registries.push(registry);
        }

        let latest = registries[1].latest_snapshot(QUORUM).await.unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest.total_stake(), Stake(30));

        // The first registry only saw its own confirmation.
        let stale = registries[0].latest_snapshot(QUORUM).await.unwrap();
        assert_eq!(stale.len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_cache_is_bounded() {
        let ledger = Arc::new(MemoryLedger::default());
        let registry = OperatorRegistry::new(
            ledger.clone(),
            Arc::new(LedgerWriter::new(
                Arc::new(SubmissionEngine::new(
                    ledger.clone(),
                    Arc::new(LocalSigner::generate()),
                    SubmissionConfig::default(),
                )),
                ledger.clone(),
                67,
            )),
            RegistryConfig {
                max_cached_snapshots: 2,
            },
        );
        ledger.advance_blocks(5).await;

        for height in 1..=4 {
            registry
                .snapshot_at(BlockNumber::new(height), QUORUM)
                .await
                .unwrap();
        }
        assert_eq!(registry.cached_snapshots().await, 2);

        // Blocks beyond the head are not cached.
        registry
            .snapshot_at(BlockNumber::new(50), QUORUM)
            .await
            .unwrap();
        assert_eq!(registry.cached_snapshots().await, 2);
    }

    #[tokio::test]
    async fn test_deregister_unknown_operator() {
        let ledger = Arc::new(MemoryLedger::default());
        let registry = registry_for(&ledger, LocalSigner::generate());
        let stranger = Address::from_bytes([9; 20]);
        let err = registry
            .deregister_operator(
                stranger,
                QuorumBitmap::single(QUORUM),
                BlsPublicKey::new(0, vec![1]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotRegistered(a) if a == stranger));
    }
}
