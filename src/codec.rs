// src/codec.rs
//! Binary layouts of the paymaster authorization.
//!
//! Layout A (authorization only, 77 bytes):
//!
//! ```text
//! validAfter:6 ‖ validUntil:6 ‖ signature:65
//! ```
//!
//! Layout B (as attached to the operation, 129 bytes):
//!
//! ```text
//! authorizer:20 ‖ verificationGasLimit:16 ‖ postOpGasLimit:16 ‖ <layout A>
//! ```
//!
//! All integers are big-endian. Decoding is always done at an explicit offset.
use ethers::types::{Address, Bytes};

use crate::error::CodecError;
use crate::types::{PaymasterAndData, PaymasterData, ValidityWindow, SIGNATURE_LENGTH};

const TIMESTAMP_LENGTH: usize = 6;
const ADDRESS_LENGTH: usize = 20;
const GAS_LIMIT_LENGTH: usize = 16;

/// Length of layout A.
pub const PAYMASTER_DATA_LENGTH: usize = 2 * TIMESTAMP_LENGTH + SIGNATURE_LENGTH;

/// Offset of layout A inside layout B.
pub const PAYMASTER_DATA_OFFSET: usize = ADDRESS_LENGTH + 2 * GAS_LIMIT_LENGTH;

/// Length of layout B.
pub const PAYMASTER_AND_DATA_LENGTH: usize = PAYMASTER_DATA_OFFSET + PAYMASTER_DATA_LENGTH;

/// Encodes layout A.
pub fn encode(window: ValidityWindow, signature: &[u8; SIGNATURE_LENGTH]) -> Bytes {
    let mut data = Vec::with_capacity(PAYMASTER_DATA_LENGTH);
    write_u48(&mut data, window.valid_after());
    write_u48(&mut data, window.valid_until());
    data.extend_from_slice(signature);

    Bytes::from(data)
}

/// Decodes layout A from the start of `bytes`.
pub fn decode(bytes: &[u8]) -> Result<PaymasterData, CodecError> {
    decode_at(bytes, 0)
}

/// Decodes layout A starting at `offset`.
///
/// Everything after `offset` must be exactly one authorization: a short tail,
/// trailing bytes and an out-of-order window are all rejected.
pub fn decode_at(bytes: &[u8], offset: usize) -> Result<PaymasterData, CodecError> {
    let tail = bytes
        .get(offset..)
        .ok_or(CodecError::OffsetOutOfBounds { offset, len: bytes.len() })?;

    if tail.len() != PAYMASTER_DATA_LENGTH {
        return Err(CodecError::InvalidLength {
            expected: PAYMASTER_DATA_LENGTH,
            actual: tail.len(),
        });
    }

    let (valid_after, rest) = tail.split_at(TIMESTAMP_LENGTH);
    let (valid_until, sig) = rest.split_at(TIMESTAMP_LENGTH);

    let window = ValidityWindow::new(read_u48(valid_after), read_u48(valid_until))?;
    let mut signature = [0u8; SIGNATURE_LENGTH];
    signature.copy_from_slice(sig);

    Ok(PaymasterData { window, signature })
}

impl PaymasterData {
    /// Encodes layout A.
    pub fn encode(&self) -> Bytes {
        encode(self.window, &self.signature)
    }
}

impl PaymasterAndData {
    /// Encodes layout B.
    pub fn encode(&self) -> Bytes {
        let mut data = Vec::with_capacity(PAYMASTER_AND_DATA_LENGTH);
        data.extend_from_slice(self.authorizer.as_bytes());
        data.extend_from_slice(&self.verification_gas_limit.to_be_bytes());
        data.extend_from_slice(&self.post_op_gas_limit.to_be_bytes());
        data.extend_from_slice(&encode(self.data.window, &self.data.signature));

        Bytes::from(data)
    }

    /// Decodes layout B.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < PAYMASTER_DATA_OFFSET {
            return Err(CodecError::InvalidLength {
                expected: PAYMASTER_AND_DATA_LENGTH,
                actual: bytes.len(),
            });
        }

        let data = decode_at(bytes, PAYMASTER_DATA_OFFSET)?;

        let (authorizer, rest) = bytes.split_at(ADDRESS_LENGTH);
        let (verification_gas_limit, rest) = rest.split_at(GAS_LIMIT_LENGTH);
        let (post_op_gas_limit, _) = rest.split_at(GAS_LIMIT_LENGTH);

        Ok(Self {
            authorizer: Address::from_slice(authorizer),
            verification_gas_limit: read_u128(verification_gas_limit),
            post_op_gas_limit: read_u128(post_op_gas_limit),
            data,
        })
    }
}

fn write_u48(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_be_bytes()[8 - TIMESTAMP_LENGTH..]);
}

fn read_u48(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf[8 - TIMESTAMP_LENGTH..].copy_from_slice(bytes);
    u64::from_be_bytes(buf)
}

fn read_u128(bytes: &[u8]) -> u128 {
    let mut buf = [0u8; 16];
    buf.copy_from_slice(bytes);
    u128::from_be_bytes(buf)
}
