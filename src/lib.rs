// src/lib.rs
//! Time-boxed, single-use sponsorship authorizations for account-abstraction
//! operations.
//!
//! [`SignerService`] issues authorizations, [`ValidationEngine`] checks them
//! against the operation it actually receives and the current [`Config`].

pub mod codec;
pub mod config;
pub mod digest;
pub mod error;
pub mod signer;
pub mod types;
pub mod validation;

pub use crate::config::{Config, ConfigChange, ConfigStore, StoredConfig};
pub use crate::digest::{AuthorizerDomain, DigestBuilder, OperationDigestInput};
pub use crate::error::{CodecError, ConfigError, SignerError, WindowError};
pub use crate::signer::{
    AuthorizationSigner, PaymasterGasLimits, SignerService, SponsorRequest, WindowPolicy,
};
pub use crate::types::{
    CostCapPolicy, PaymasterAndData, PaymasterData, UserOperation, ValidationResult,
    ValidityWindow, WindowStatus,
};
pub use crate::validation::{DigestScheme, ValidationEngine};
