use crate::{
    Call, Ledger, LedgerError, OperatorStatus, Purpose, Receipt, ReceiptStatus, Result,
    SubmissionEngine,
};
use async_trait::async_trait;
use avs_types::{
    Address, BlockNumber, BlsPublicKey, BlsSignatureShare, NonSignerStakesAndSignature,
    QuorumBitmap, QuorumNumber, Task, TaskIndex, TaskResponse, TaskResponseMetadata, TxHash,
};
use std::sync::Arc;
use tracing::info;

/// Write operations against the task manager and registry contracts.
///
/// Every operation except `dispatch_task` is safe to retry: if the ledger
/// already records the effect, the recorded receipt is returned and nothing is
/// broadcast. `dispatch_task` has no key to deduplicate on before the task
/// exists, so callers must not blindly retry it.
#[async_trait]
pub trait Writer: Send + Sync {
    async fn register_operator(
        &self,
        bls_pubkey: BlsPublicKey,
        quorum_bitmap: QuorumBitmap,
        socket: String,
    ) -> Result<Receipt>;

    async fn deregister_operator(
        &self,
        address: Address,
        quorum_bitmap: QuorumBitmap,
        bls_pubkey: BlsPublicKey,
    ) -> Result<Receipt>;

    async fn update_stakes(&self, addresses: Vec<Address>) -> Result<Receipt>;

    async fn dispatch_task(
        &self,
        input: Vec<u8>,
        quorum_number: QuorumNumber,
        block_deadline: BlockNumber,
    ) -> Result<(Task, TaskIndex)>;

    async fn submit_aggregated_response(
        &self,
        task: &Task,
        response: &TaskResponse,
        non_signer_stakes_and_signature: &NonSignerStakesAndSignature,
    ) -> Result<Receipt>;

    async fn raise_challenge(
        &self,
        task: &Task,
        response: &TaskResponse,
        metadata: &TaskResponseMetadata,
        non_signer_pubkeys: &[BlsPublicKey],
        proof: &[(Address, BlsSignatureShare)],
    ) -> Result<Receipt>;
}

/// [`Writer`] backed by a ledger and one submission engine.
pub struct LedgerWriter {
    engine: Arc<SubmissionEngine>,
    ledger: Arc<dyn Ledger>,
    quorum_threshold_percentage: u8,
}

impl LedgerWriter {
    pub fn new(
        engine: Arc<SubmissionEngine>,
        ledger: Arc<dyn Ledger>,
        quorum_threshold_percentage: u8,
    ) -> Self {
        Self {
            engine,
            ledger,
            quorum_threshold_percentage,
        }
    }

    pub fn address(&self) -> Address {
        self.engine.address()
    }

    pub fn engine(&self) -> &Arc<SubmissionEngine> {
        &self.engine
    }

    async fn recorded_receipt(&self, tx_hash: TxHash) -> Result<Receipt> {
        match self.ledger.get_receipt(&tx_hash).await? {
            ReceiptStatus::Confirmed(receipt) => Ok(receipt),
            _ => Err(LedgerError::MissingReceipt(tx_hash)),
        }
    }
}

#[async_trait]
impl Writer for LedgerWriter {
    async fn register_operator(
        &self,
        bls_pubkey: BlsPublicKey,
        quorum_bitmap: QuorumBitmap,
        socket: String,
    ) -> Result<Receipt> {
        if let OperatorStatus::Registered { tx_hash } =
            self.ledger.operator_registered(&self.address()).await?
        {
            info!(operator = %self.address(), "Operator already registered");
            return self.recorded_receipt(tx_hash).await;
        }
        self.engine
            .submit(
                Purpose::RegisterOperator,
                Call::RegisterOperator {
                    bls_pubkey,
                    quorum_bitmap,
                    socket,
                },
            )
            .await
    }

    async fn deregister_operator(
        &self,
        address: Address,
        quorum_bitmap: QuorumBitmap,
        bls_pubkey: BlsPublicKey,
    ) -> Result<Receipt> {
        if let OperatorStatus::Deregistered { tx_hash } =
            self.ledger.operator_registered(&address).await?
        {
            info!(operator = %address, "Operator already deregistered");
            return self.recorded_receipt(tx_hash).await;
        }
        self.engine
            .submit(
                Purpose::DeregisterOperator,
                Call::DeregisterOperator {
                    address,
                    quorum_bitmap,
                    bls_pubkey,
                },
            )
            .await
    }

    async fn update_stakes(&self, addresses: Vec<Address>) -> Result<Receipt> {
        // Re-applying a stake refresh leaves the same stakes in place.
        self.engine
            .submit(Purpose::UpdateStakes, Call::UpdateStakes { addresses })
            .await
    }

    async fn dispatch_task(
        &self,
        input: Vec<u8>,
        quorum_number: QuorumNumber,
        block_deadline: BlockNumber,
    ) -> Result<(Task, TaskIndex)> {
        let receipt = self
            .engine
            .submit(
                Purpose::CreateTask,
                Call::CreateNewTask {
                    input,
                    quorum_number,
                    quorum_threshold_percentage: self.quorum_threshold_percentage,
                    response_deadline: block_deadline,
                },
            )
            .await?;
        let task = receipt.created_task().cloned().ok_or_else(|| {
            LedgerError::Conflict(format!(
                "receipt {} carries no task creation event",
                receipt.tx_hash
            ))
        })?;
        let index = task.index;
        info!(
            task_index = %index,
            created_block = %task.created_block,
            response_deadline = %task.response_deadline,
            "📋 Task created on ledger"
        );
        Ok((task, index))
    }

    async fn submit_aggregated_response(
        &self,
        task: &Task,
        response: &TaskResponse,
        non_signer_stakes_and_signature: &NonSignerStakesAndSignature,
    ) -> Result<Receipt> {
        let facts = self
            .ledger
            .task_facts(task.index)
            .await?
            .ok_or(LedgerError::UnknownTask(task.index))?;
        if let Some(recorded) = facts.response {
            if recorded.response != *response {
                return Err(LedgerError::Conflict(format!(
                    "task {} already has a different response recorded",
                    task.index
                )));
            }
            info!(task_index = %task.index, tx_hash = %recorded.tx_hash, "Response already recorded");
            return self.recorded_receipt(recorded.tx_hash).await;
        }
        self.engine
            .submit(
                Purpose::RespondToTask,
                Call::RespondToTask {
                    task: task.clone(),
                    response: response.clone(),
                    non_signer_stakes_and_signature: non_signer_stakes_and_signature.clone(),
                },
            )
            .await
    }

    async fn raise_challenge(
        &self,
        task: &Task,
        response: &TaskResponse,
        metadata: &TaskResponseMetadata,
        non_signer_pubkeys: &[BlsPublicKey],
        proof: &[(Address, BlsSignatureShare)],
    ) -> Result<Receipt> {
        let facts = self
            .ledger
            .task_facts(task.index)
            .await?
            .ok_or(LedgerError::UnknownTask(task.index))?;
        if let Some(challenge) = facts.challenge {
            info!(task_index = %task.index, tx_hash = %challenge.tx_hash, "Challenge already recorded");
            return self.recorded_receipt(challenge.tx_hash).await;
        }
        self.engine
            .submit(
                Purpose::RaiseChallenge,
                Call::RaiseChallenge {
                    task: task.clone(),
                    response: response.clone(),
                    metadata: metadata.clone(),
                    non_signer_pubkeys: non_signer_pubkeys.to_vec(),
                    proof: proof.to_vec(),
                },
            )
            .await
    }
}
