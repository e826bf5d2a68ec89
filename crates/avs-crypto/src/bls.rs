use crate::{CryptoError, Result};
use avs_types::{BlsPublicKey, BlsSignature, BlsSignatureShare};
use bls12_381::{G1Affine, G1Projective, G2Affine, G2Projective};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use threshold_crypto::{
    PublicKey, PublicKeySet, PublicKeyShare, SecretKeySet, SecretKeyShare, Signature,
    SignatureShare, PK_SIZE, SIG_SIZE,
};

fn prefixed(dst: &[u8], message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(dst.len() + message.len());
    out.extend_from_slice(dst);
    out.extend_from_slice(message);
    out
}

fn fixed<const N: usize>(bytes: &[u8], what: &str) -> Result<[u8; N]> {
    bytes.try_into().map_err(|_| {
        CryptoError::Serialization(format!("{what}: expected {N} bytes, got {}", bytes.len()))
    })
}

fn decode_share(share: &BlsSignatureShare) -> Result<SignatureShare> {
    SignatureShare::from_bytes(fixed::<SIG_SIZE>(share.as_bytes(), "signature share")?)
        .map_err(|e| CryptoError::Serialization(format!("{e:?}")))
}

fn decode_signature(signature: &BlsSignature) -> Result<Signature> {
    Signature::from_bytes(fixed::<SIG_SIZE>(signature.as_bytes(), "signature")?)
        .map_err(|e| CryptoError::Serialization(format!("{e:?}")))
}

fn decode_public_key_share(key: &BlsPublicKey) -> Result<PublicKeyShare> {
    PublicKeyShare::from_bytes(fixed::<PK_SIZE>(key.as_bytes(), "public key")?)
        .map_err(|e| CryptoError::Serialization(format!("{e:?}")))
}

fn g1_point(bytes: &[u8]) -> Result<G1Projective> {
    let compressed = fixed::<48>(bytes, "G1 point")?;
    Option::<G1Affine>::from(G1Affine::from_compressed(&compressed))
        .map(G1Projective::from)
        .ok_or_else(|| CryptoError::InvalidPoint("G1".into()))
}

fn g2_point(bytes: &[u8]) -> Result<G2Projective> {
    let compressed = fixed::<96>(bytes, "G2 point")?;
    Option::<G2Affine>::from(G2Affine::from_compressed(&compressed))
        .map(G2Projective::from)
        .ok_or_else(|| CryptoError::InvalidPoint("G2".into()))
}

/// Sum of the given operators' public key shares, in threshold_crypto form.
///
/// Keys must be distinct by share index; the same key counted twice would
/// let one operator stand in for two.
fn aggregate_public_key(keys: &[BlsPublicKey]) -> Result<PublicKey> {
    if keys.is_empty() {
        return Err(CryptoError::EmptySignerSet);
    }
    let mut seen = BTreeSet::new();
    let mut sum = G1Projective::identity();
    for key in keys {
        if !seen.insert(key.share_index) {
            return Err(CryptoError::DuplicateShare {
                index: key.share_index,
            });
        }
        sum += g1_point(key.as_bytes())?;
    }
    PublicKey::from_bytes(G1Affine::from(sum).to_compressed())
        .map_err(|e| CryptoError::InvalidPoint(format!("{e:?}")))
}

/// Dealing parameters (t, n) for a set of n key shares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub total_participants: usize,
    pub threshold: usize,
}

impl ThresholdConfig {
    pub fn new(total: usize, threshold: usize) -> Result<Self> {
        if threshold == 0 || threshold > total {
            return Err(CryptoError::InvalidThreshold {
                t: threshold,
                n: total,
            });
        }
        Ok(Self {
            total_participants: total,
            threshold,
        })
    }

    /// t = ⌈2n/3⌉
    pub fn with_bft_threshold(total: usize) -> Result<Self> {
        Self::new(total, (2 * total + 2) / 3)
    }
}

/// The group public key set shared by every operator in a quorum.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPublicKey(PublicKeySet);

impl GroupPublicKey {
    pub fn from_public_key_set(set: PublicKeySet) -> Self {
        Self(set)
    }

    /// Dealing threshold of the key set.
    pub fn shares_needed(&self) -> usize {
        self.0.threshold() + 1
    }

    /// Public key share for the operator holding `share_index`, in the form
    /// registered on the ledger.
    pub fn public_key_share(&self, share_index: u64) -> Result<BlsPublicKey> {
        let share = self.0.public_key_share(share_index);
        Ok(BlsPublicKey::new(share_index, share.to_bytes().to_vec()))
    }

    pub fn to_hex(&self) -> Result<String> {
        Ok(hex::encode(bincode::serialize(&self.0)?))
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| CryptoError::Serialization(e.to_string()))?;
        Ok(Self(bincode::deserialize(&bytes)?))
    }
}

impl fmt::Debug for GroupPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.public_key().to_bytes();
        write!(
            f,
            "GroupPublicKey(t={}, {}...)",
            self.shares_needed(),
            &hex::encode(bytes)[..8]
        )
    }
}

/// One operator's secret key share.
#[derive(Clone)]
pub struct OperatorKeyShare {
    pub share_index: u64,
    secret: SecretKeyShare,
}

impl OperatorKeyShare {
    pub fn new(share_index: u64, secret: SecretKeyShare) -> Self {
        Self {
            share_index,
            secret,
        }
    }

    pub fn public_key(&self) -> Result<BlsPublicKey> {
        let share = self.secret.public_key_share();
        Ok(BlsPublicKey::new(self.share_index, share.to_bytes().to_vec()))
    }
}

impl fmt::Debug for OperatorKeyShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OperatorKeyShare({}, <redacted>)", self.share_index)
    }
}

/// Signs and verifies domain-separated shares and aggregates them over a
/// signer set.
#[derive(Debug, Clone, Copy)]
pub struct ThresholdSigner {
    dst: &'static [u8],
}

impl ThresholdSigner {
    pub fn new(dst: &'static [u8]) -> Self {
        Self { dst }
    }

    pub fn task_responses() -> Self {
        Self::new(crate::dst::TASK_RESPONSE)
    }

    pub fn sign_share(&self, key: &OperatorKeyShare, message: &[u8]) -> Result<BlsSignatureShare> {
        let share = key.secret.sign(prefixed(self.dst, message));
        Ok(BlsSignatureShare::new(
            key.share_index,
            share.to_bytes().to_vec(),
        ))
    }

    /// Verify one share against the signer's registered public key share.
    ///
    /// Malformed bytes are reported as `Ok(false)`: an unparseable share is
    /// simply not a valid share.
    pub fn verify_share(
        &self,
        public_key: &BlsPublicKey,
        message: &[u8],
        share: &BlsSignatureShare,
    ) -> Result<bool> {
        if public_key.share_index != share.share_index {
            return Err(CryptoError::IndexMismatch {
                share: share.share_index,
                key: public_key.share_index,
            });
        }
        let pk = decode_public_key_share(public_key)?;
        let sig = match decode_share(share) {
            Ok(sig) => sig,
            Err(_) => return Ok(false),
        };
        Ok(pk.verify(&sig, prefixed(self.dst, message)))
    }

    /// Aggregate signer shares by point addition and check the result
    /// against the sum of the signers' public keys.
    ///
    /// Any non-empty signer set aggregates; how much stake it carries is the
    /// caller's concern. The signature binds the exact signer set.
    pub fn aggregate(
        &self,
        message: &[u8],
        signers: &[(BlsPublicKey, BlsSignatureShare)],
    ) -> Result<BlsSignature> {
        let mut sum = G2Projective::identity();
        let mut keys = Vec::with_capacity(signers.len());
        for (key, share) in signers {
            if key.share_index != share.share_index {
                return Err(CryptoError::IndexMismatch {
                    share: share.share_index,
                    key: key.share_index,
                });
            }
            sum += g2_point(share.as_bytes())?;
            keys.push(key.clone());
        }

        let signature = BlsSignature::new(G2Affine::from(sum).to_compressed().to_vec());
        if !self.verify_aggregate(&keys, message, &signature)? {
            return Err(CryptoError::VerificationFailed);
        }
        Ok(signature)
    }

    /// Verify an aggregate signature against the signer set that produced it.
    pub fn verify_aggregate(
        &self,
        signer_keys: &[BlsPublicKey],
        message: &[u8],
        signature: &BlsSignature,
    ) -> Result<bool> {
        let key = aggregate_public_key(signer_keys)?;
        let sig = decode_signature(signature)?;
        Ok(key.verify(&sig, prefixed(self.dst, message)))
    }
}

/// Generate a fresh (t, n) key set. Used by the local simulation and tests;
/// production operators receive their shares from a key ceremony.
pub fn generate_threshold_keys(
    total: usize,
    threshold: usize,
) -> Result<(GroupPublicKey, Vec<OperatorKeyShare>)> {
    let config = ThresholdConfig::new(total, threshold)?;

    // threshold_crypto takes the polynomial degree, one less than the share count
    let mut rng = rand_07::thread_rng();
    let sk_set = SecretKeySet::random(config.threshold - 1, &mut rng);
    let group = GroupPublicKey(sk_set.public_keys());

    let shares = (0..total as u64)
        .map(|i| OperatorKeyShare::new(i, sk_set.secret_key_share(i)))
        .collect();

    Ok((group, shares))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dst;

    fn signed(
        keys: &[OperatorKeyShare],
        signer: &ThresholdSigner,
        message: &[u8],
    ) -> Vec<(BlsPublicKey, BlsSignatureShare)> {
        keys.iter()
            .map(|k| (k.public_key().unwrap(), signer.sign_share(k, message).unwrap()))
            .collect()
    }

    #[test]
    fn test_threshold_config() {
        assert!(ThresholdConfig::new(3, 2).is_ok());
        assert!(ThresholdConfig::new(3, 4).is_err());
        assert!(ThresholdConfig::new(3, 0).is_err());
        assert_eq!(ThresholdConfig::with_bft_threshold(10).unwrap().threshold, 7);
    }

    #[test]
    fn test_aggregate_and_verify() {
        let (_, keys) = generate_threshold_keys(5, 3).unwrap();
        let signer = ThresholdSigner::task_responses();
        let message = b"digest";

        let signers = signed(&keys[..3], &signer, message);
        let sig = signer.aggregate(message, &signers).unwrap();
        let signer_keys: Vec<_> = signers.iter().map(|(k, _)| k.clone()).collect();

        assert!(signer.verify_aggregate(&signer_keys, message, &sig).unwrap());
        assert!(!signer.verify_aggregate(&signer_keys, b"other", &sig).unwrap());
    }

    #[test]
    fn test_single_signer_aggregates() {
        let (_, keys) = generate_threshold_keys(4, 3).unwrap();
        let signer = ThresholdSigner::task_responses();

        let signers = signed(&keys[..1], &signer, b"m");
        let sig = signer.aggregate(b"m", &signers).unwrap();
        assert!(signer
            .verify_aggregate(&[keys[0].public_key().unwrap()], b"m", &sig)
            .unwrap());
    }

    #[test]
    fn test_aggregate_binds_signer_set() {
        let (_, keys) = generate_threshold_keys(4, 2).unwrap();
        let signer = ThresholdSigner::task_responses();
        let message = b"digest";

        let first = signer.aggregate(message, &signed(&keys[..2], &signer, message)).unwrap();
        let second = signer.aggregate(message, &signed(&keys[2..], &signer, message)).unwrap();
        assert_ne!(first, second);

        let all: Vec<_> = keys.iter().map(|k| k.public_key().unwrap()).collect();
        assert!(signer.verify_aggregate(&all[..2], message, &first).unwrap());
        assert!(!signer.verify_aggregate(&all, message, &first).unwrap());
        assert!(!signer.verify_aggregate(&all[..3], message, &first).unwrap());
        assert!(!signer.verify_aggregate(&all[2..], message, &first).unwrap());
    }

    #[test]
    fn test_verify_share_against_registered_key() {
        let (group, keys) = generate_threshold_keys(3, 2).unwrap();
        let signer = ThresholdSigner::task_responses();
        let share = signer.sign_share(&keys[1], b"m").unwrap();

        let registered = group.public_key_share(1).unwrap();
        assert_eq!(registered, keys[1].public_key().unwrap());
        assert!(signer.verify_share(&registered, b"m", &share).unwrap());
        assert!(!signer.verify_share(&registered, b"x", &share).unwrap());

        let wrong = group.public_key_share(0).unwrap();
        assert!(matches!(
            signer.verify_share(&wrong, b"m", &share),
            Err(CryptoError::IndexMismatch { share: 1, key: 0 })
        ));

        let garbage = BlsSignatureShare::new(1, vec![0xde, 0xad]);
        assert!(!signer.verify_share(&registered, b"m", &garbage).unwrap());
    }

    #[test]
    fn test_domain_separation() {
        let (group, keys) = generate_threshold_keys(3, 2).unwrap();
        let response = ThresholdSigner::new(dst::TASK_RESPONSE);
        let challenge = ThresholdSigner::new(dst::CHALLENGE);

        let share = response.sign_share(&keys[0], b"m").unwrap();
        assert_ne!(share, challenge.sign_share(&keys[0], b"m").unwrap());
        let key = group.public_key_share(0).unwrap();
        assert!(!challenge.verify_share(&key, b"m", &share).unwrap());
    }

    #[test]
    fn test_empty_duplicate_and_forged_sets() {
        let (_, keys) = generate_threshold_keys(4, 3).unwrap();
        let signer = ThresholdSigner::task_responses();

        assert!(matches!(
            signer.aggregate(b"m", &[]),
            Err(CryptoError::EmptySignerSet)
        ));

        let mut signers = signed(&keys[..2], &signer, b"m");
        signers.push(signers[0].clone());
        assert!(matches!(
            signer.aggregate(b"m", &signers),
            Err(CryptoError::DuplicateShare { index: 0 })
        ));

        // Operator 1's key paired with a share signed by operator 2.
        let mut forged = signed(&keys[..2], &signer, b"m");
        let other = signer.sign_share(&keys[2], b"m").unwrap();
        forged[1].1 = BlsSignatureShare::new(1, other.as_bytes().to_vec());
        assert!(matches!(
            signer.aggregate(b"m", &forged),
            Err(CryptoError::VerificationFailed)
        ));
    }

    #[test]
    fn test_group_key_hex_roundtrip() {
        let (group, _) = generate_threshold_keys(3, 2).unwrap();
        let parsed = GroupPublicKey::from_hex(&group.to_hex().unwrap()).unwrap();
        assert_eq!(group, parsed);
    }
}
