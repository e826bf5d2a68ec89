use crate::{LedgerError, Result, SignedTransaction, UnsignedTransaction};
use avs_types::Address;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

/// Signs transactions for one sending identity.
pub trait TxSigner: Send + Sync {
    fn address(&self) -> Address;

    fn sign(&self, tx: UnsignedTransaction) -> Result<SignedTransaction>;
}

/// ed25519 key held in process memory.
#[derive(Clone)]
pub struct LocalSigner {
    signing_key: SigningKey,
    address: Address,
}

impl LocalSigner {
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(bytes))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let address = Address::from_public_key(&signing_key.verifying_key().to_bytes());
        Self {
            signing_key,
            address,
        }
    }
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LocalSigner({})", self.address)
    }
}

impl TxSigner for LocalSigner {
    fn address(&self) -> Address {
        self.address
    }

    fn sign(&self, tx: UnsignedTransaction) -> Result<SignedTransaction> {
        if tx.from != self.address {
            return Err(LedgerError::Signing(format!(
                "transaction from {} cannot be signed by {}",
                tx.from, self.address
            )));
        }
        let message = bincode::serialize(&tx)?;
        let signature = self.signing_key.sign(&message);
        Ok(SignedTransaction {
            unsigned: tx,
            public_key: self.signing_key.verifying_key().to_bytes(),
            signature: signature.to_bytes().to_vec(),
        })
    }
}

/// Check the signature and that the key matches the sender address.
pub fn verify_transaction(tx: &SignedTransaction) -> bool {
    if Address::from_public_key(&tx.public_key) != tx.unsigned.from {
        return false;
    }
    let Ok(key) = VerifyingKey::from_bytes(&tx.public_key) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&tx.signature) else {
        return false;
    };
    let Ok(message) = bincode::serialize(&tx.unsigned) else {
        return false;
    };
    key.verify(&message, &signature).is_ok()
}
