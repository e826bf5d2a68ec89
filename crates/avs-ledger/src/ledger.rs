use crate::{OperatorStatus, ReceiptStatus, Result, SendError, SignedTransaction, TaskFacts};
use async_trait::async_trait;
use avs_types::{Address, BlockNumber, OperatorSet, QuorumNumber, TaskIndex, TxHash};

/// Read and submit access to the ledger.
///
/// Implementations are expected to be cheap to call concurrently; the
/// submission engine is the only component that serializes access, and only
/// per sending identity.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn head_block(&self) -> Result<BlockNumber>;

    /// Authoritative next nonce for `address`, counting only included
    /// transactions.
    async fn next_nonce(&self, address: &Address) -> Result<u64>;

    async fn gas_price(&self) -> Result<u128>;

    async fn send_transaction(
        &self,
        tx: SignedTransaction,
    ) -> std::result::Result<TxHash, SendError>;

    async fn get_receipt(&self, hash: &TxHash) -> Result<ReceiptStatus>;

    async fn operator_set_snapshot(
        &self,
        block: BlockNumber,
        quorum: QuorumNumber,
    ) -> Result<OperatorSet>;

    async fn task_facts(&self, index: TaskIndex) -> Result<Option<TaskFacts>>;

    async fn operator_registered(&self, address: &Address) -> Result<OperatorStatus>;
}
