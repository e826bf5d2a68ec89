use avs_types::{
    Address, BlockNumber, BlsPublicKey, BlsSignatureShare, NonSignerStakesAndSignature,
    QuorumBitmap, QuorumNumber, Task, TaskIndex, TaskResponse, TaskResponseMetadata, TxHash,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a transaction is for. Used for logging and error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Purpose {
    RegisterOperator,
    DeregisterOperator,
    UpdateStakes,
    CreateTask,
    RespondToTask,
    RaiseChallenge,
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Purpose::RegisterOperator => "register-operator",
            Purpose::DeregisterOperator => "deregister-operator",
            Purpose::UpdateStakes => "update-stakes",
            Purpose::CreateTask => "create-task",
            Purpose::RespondToTask => "respond-to-task",
            Purpose::RaiseChallenge => "raise-challenge",
        };
        f.write_str(s)
    }
}

/// Contract call payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Call {
    RegisterOperator {
        bls_pubkey: BlsPublicKey,
        quorum_bitmap: QuorumBitmap,
        socket: String,
    },
    DeregisterOperator {
        address: Address,
        quorum_bitmap: QuorumBitmap,
        bls_pubkey: BlsPublicKey,
    },
    UpdateStakes {
        addresses: Vec<Address>,
    },
    CreateNewTask {
        input: Vec<u8>,
        quorum_number: QuorumNumber,
        quorum_threshold_percentage: u8,
        response_deadline: BlockNumber,
    },
    RespondToTask {
        task: Task,
        response: TaskResponse,
        non_signer_stakes_and_signature: NonSignerStakesAndSignature,
    },
    RaiseChallenge {
        task: Task,
        response: TaskResponse,
        metadata: TaskResponseMetadata,
        non_signer_pubkeys: Vec<BlsPublicKey>,
        proof: Vec<(Address, BlsSignatureShare)>,
    },
}

impl Call {
    pub fn purpose(&self) -> Purpose {
        match self {
            Call::RegisterOperator { .. } => Purpose::RegisterOperator,
            Call::DeregisterOperator { .. } => Purpose::DeregisterOperator,
            Call::UpdateStakes { .. } => Purpose::UpdateStakes,
            Call::CreateNewTask { .. } => Purpose::CreateTask,
            Call::RespondToTask { .. } => Purpose::RespondToTask,
            Call::RaiseChallenge { .. } => Purpose::RaiseChallenge,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedTransaction {
    pub from: Address,
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub call: Call,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub unsigned: UnsignedTransaction,
    pub public_key: [u8; 32],
    pub signature: Vec<u8>,
}

impl SignedTransaction {
    pub fn hash(&self) -> crate::Result<TxHash> {
        let mut data = bincode::serialize(&self.unsigned)?;
        data.extend_from_slice(&self.signature);
        Ok(TxHash::new(&data))
    }

    pub fn from(&self) -> Address {
        self.unsigned.from
    }

    pub fn nonce(&self) -> u64 {
        self.unsigned.nonce
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    Success,
    Reverted(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    OperatorRegistered {
        address: Address,
        quorum_bitmap: QuorumBitmap,
    },
    OperatorDeregistered {
        address: Address,
        quorum_bitmap: QuorumBitmap,
    },
    StakesUpdated {
        addresses: Vec<Address>,
    },
    NewTaskCreated(Task),
    TaskResponded {
        task_index: TaskIndex,
        metadata: TaskResponseMetadata,
    },
    ChallengeRaised {
        task_index: TaskIndex,
        challenger: Address,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub from: Address,
    pub nonce: u64,
    pub block: BlockNumber,
    pub status: TxStatus,
    pub events: Vec<Event>,
}

impl Receipt {
    pub fn is_success(&self) -> bool {
        self.status == TxStatus::Success
    }

    pub fn created_task(&self) -> Option<&Task> {
        self.events.iter().find_map(|e| match e {
            Event::NewTaskCreated(task) => Some(task),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptStatus {
    Confirmed(Receipt),
    Pending,
    NotFound,
}

/// A response the ledger has accepted for a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedResponse {
    pub response: TaskResponse,
    pub metadata: TaskResponseMetadata,
    pub non_signer_pubkeys: Vec<BlsPublicKey>,
    pub tx_hash: TxHash,
}

/// A challenge the ledger has accepted against a task's response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedChallenge {
    pub challenger: Address,
    pub block: BlockNumber,
    pub tx_hash: TxHash,
}

/// Everything the ledger records about one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFacts {
    pub task: Task,
    pub response: Option<RecordedResponse>,
    pub challenge: Option<RecordedChallenge>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatorStatus {
    NeverRegistered,
    Registered { tx_hash: TxHash },
    Deregistered { tx_hash: TxHash },
}
