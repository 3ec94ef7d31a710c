// src/types.rs
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};

use crate::error::WindowError;

/// Largest value representable by a `uint48` timestamp.
pub const MAX_U48: u64 = (1 << 48) - 1;

/// Length of a recoverable `r ‖ s ‖ v` signature.
pub const SIGNATURE_LENGTH: usize = 65;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

impl UserOperation {
    /// Hash of the call payload exactly as it will be executed.
    pub fn call_data_hash(&self) -> H256 {
        H256(keccak256(&self.call_data))
    }

    /// Upper bound of what sponsoring this operation can cost, in wei.
    ///
    /// `paymaster_gas` is the paymaster's own verification + postOp allowance.
    /// Returns `None` on overflow.
    pub fn max_gas_cost(&self, paymaster_gas: U256) -> Option<U256> {
        let total_gas = self
            .call_gas_limit
            .checked_add(self.verification_gas_limit)
            .and_then(|sum| sum.checked_add(self.pre_verification_gas))
            .and_then(|sum| sum.checked_add(paymaster_gas))?;

        total_gas.checked_mul(self.max_fee_per_gas)
    }
}

/// Time range `[valid_after, valid_until)` during which an authorization is honored.
///
/// Both bounds are 48-bit timestamps and `valid_after < valid_until` always holds.
/// The fields are private so a window cannot be widened once it exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidityWindow {
    valid_after: u64,
    valid_until: u64,
}

impl ValidityWindow {
    pub fn new(valid_after: u64, valid_until: u64) -> Result<Self, WindowError> {
        if valid_after > MAX_U48 {
            return Err(WindowError::Overflow(valid_after));
        }
        if valid_until > MAX_U48 {
            return Err(WindowError::Overflow(valid_until));
        }
        if valid_after >= valid_until {
            return Err(WindowError::Inverted { valid_after, valid_until });
        }

        Ok(Self { valid_after, valid_until })
    }

    pub fn valid_after(&self) -> u64 {
        self.valid_after
    }

    pub fn valid_until(&self) -> u64 {
        self.valid_until
    }

    /// Classifies `now` against the window.
    ///
    /// `valid_until` itself is already expired; `valid_after` itself is active.
    pub fn status_at(&self, now: u64) -> WindowStatus {
        if now < self.valid_after {
            WindowStatus::NotYetValid
        } else if now >= self.valid_until {
            WindowStatus::Expired
        } else {
            WindowStatus::Active
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowStatus {
    NotYetValid,
    Active,
    Expired,
}

/// Decoded authorization payload (wire layout A).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymasterData {
    pub window: ValidityWindow,
    pub signature: [u8; SIGNATURE_LENGTH],
}

/// Authorization embedded with the authorizer and its gas limits (wire layout B).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymasterAndData {
    pub authorizer: Address,
    pub verification_gas_limit: u128,
    pub post_op_gas_limit: u128,
    pub data: PaymasterData,
}

pub const STATUS_ACCEPTED: &str = "accepted";
pub const STATUS_SIGNATURE_REJECTED: &str = "signature_rejected";
pub const STATUS_MALFORMED: &str = "malformed";
pub const STATUS_COST_EXCEEDED: &str = "cost_exceeded";

/// Outcome of validating one candidate operation.
///
/// `SignatureRejected` is a data outcome: the operation is simply not sponsored.
/// `Malformed` and `CostExceeded` are fatal and abort the whole operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationResult {
    Accepted(ValidityWindow),
    SignatureRejected(ValidityWindow),
    Malformed,
    CostExceeded,
}

impl ValidationResult {
    /// Fixed status string shared with every other implementation of the protocol.
    pub fn status(&self) -> &'static str {
        match self {
            ValidationResult::Accepted(_) => STATUS_ACCEPTED,
            ValidationResult::SignatureRejected(_) => STATUS_SIGNATURE_REJECTED,
            ValidationResult::Malformed => STATUS_MALFORMED,
            ValidationResult::CostExceeded => STATUS_COST_EXCEEDED,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ValidationResult::Malformed | ValidationResult::CostExceeded)
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, ValidationResult::Accepted(_))
    }

    /// The window as decoded, for the two outcomes that carry one.
    pub fn window(&self) -> Option<ValidityWindow> {
        match self {
            ValidationResult::Accepted(window) | ValidationResult::SignatureRejected(window) => {
                Some(*window)
            }
            ValidationResult::Malformed | ValidationResult::CostExceeded => None,
        }
    }
}

/// What to do with a request whose cost is above `max_allowed_cost`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostCapPolicy {
    /// Abort the whole operation with `CostExceeded`.
    #[default]
    Abort,
    /// Decline sponsorship as `SignatureRejected`, keeping the decoded window.
    Decline,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymasterResponse {
    pub paymaster_and_data: Bytes,
    pub valid_after: u64,
    pub valid_until: u64,
}
