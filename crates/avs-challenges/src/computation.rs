use crate::{ChallengeError, Result};

/// The domain computation operators are asked to perform.
///
/// Implementations must be pure: the same input always yields the same
/// answer, so a recomputation is a faithful check of a recorded response.
pub trait Computation: Send + Sync {
    fn compute(&self, input: &[u8]) -> Result<Vec<u8>>;
}

/// Squares a big-endian unsigned integer of at most 64 bits.
///
/// The answer is the 128-bit big-endian square. Leading zero bytes in the
/// input are ignored and an empty input is zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct Squaring;

impl Squaring {
    pub fn encode_input(value: u64) -> Vec<u8> {
        value.to_be_bytes().to_vec()
    }

    pub fn decode_answer(answer: &[u8]) -> Option<u128> {
        let bytes: [u8; 16] = answer.try_into().ok()?;
        Some(u128::from_be_bytes(bytes))
    }

    fn decode_input(input: &[u8]) -> Result<u64> {
        let first = input.iter().position(|b| *b != 0).unwrap_or(input.len());
        let significant = &input[first..];
        if significant.len() > 8 {
            return Err(ChallengeError::InvalidInput(format!(
                "{} significant bytes, at most 8 supported",
                significant.len()
            )));
        }
        let mut buf = [0u8; 8];
        buf[8 - significant.len()..].copy_from_slice(significant);
        Ok(u64::from_be_bytes(buf))
    }
}

impl Computation for Squaring {
    fn compute(&self, input: &[u8]) -> Result<Vec<u8>> {
        let value = Self::decode_input(input)? as u128;
        Ok((value * value).to_be_bytes().to_vec())
    }
}
