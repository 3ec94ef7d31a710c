// src/signer.rs
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Signature, H256, U256};
use tracing::{debug, error, info};

use crate::digest::{
    AuthorizerDomain, DigestBuilder, OperationDigestInput, DEFAULT_DOMAIN_NAME,
    DEFAULT_DOMAIN_VERSION,
};
use crate::error::SignerError;
use crate::types::{PaymasterAndData, PaymasterData, UserOperation, ValidityWindow, SIGNATURE_LENGTH};

/// Seconds subtracted from `now` for `validAfter`, to absorb clock drift.
pub const DEFAULT_CLOCK_SKEW: u64 = 5;

pub const DEFAULT_TTL: u64 = 3600;

/// `secp256k1n / 2`; signatures with a larger `s` are malleable duplicates.
const SECP256K1_HALF_ORDER: [u8; 32] = [
    0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0x5d, 0x57, 0x6e, 0x73, 0x57, 0xa4, 0x50, 0x1d, 0xdf, 0xe9, 0x2f, 0x46, 0x68, 0x1b, 0x20, 0xa0,
];

/// Recovers the address that produced `signature` over `digest`.
///
/// Only canonical signatures are accepted: `v` must be 27 or 28 and `s` must
/// be in the lower half of the curve order. Anything else yields `None`.
pub fn recover_signer(digest: H256, signature: &[u8; SIGNATURE_LENGTH]) -> Option<Address> {
    let signature = Signature::try_from(&signature[..]).ok()?;

    if !matches!(signature.v, 27 | 28) {
        return None;
    }
    if signature.s > U256::from_big_endian(&SECP256K1_HALF_ORDER) {
        return None;
    }

    signature.recover(digest).ok()
}

/// Dummy signature for cost estimation.
///
/// Canonical-looking and mostly non-zero so the estimated calldata and
/// recovery cost is an upper bound. It recovers to no known key and must
/// never be submitted for execution.
pub fn stub_signature() -> [u8; SIGNATURE_LENGTH] {
    let mut signature = [0u8; SIGNATURE_LENGTH];
    signature[..15].fill(0xff);
    signature[15] = 0xf0;
    signature[32] = 0x7a;
    signature[33..64].fill(0xaa);
    signature[64] = 0x1c;
    signature
}

/// Backend holding the authority's private key.
#[async_trait]
pub trait AuthorizationSigner: Send + Sync {
    /// Address the backend signs as; this is the config's verifying identity.
    fn address(&self) -> Address;

    /// Signs a 32-byte digest without any further prefixing.
    async fn sign_digest(&self, digest: H256) -> Result<Signature, SignerError>;
}

#[async_trait]
impl AuthorizationSigner for LocalWallet {
    fn address(&self) -> Address {
        Signer::address(self)
    }

    async fn sign_digest(&self, digest: H256) -> Result<Signature, SignerError> {
        self.sign_hash(digest).map_err(|e| SignerError::InvalidKey(e.to_string()))
    }
}

pub fn wallet_from_key(private_key: &str) -> Result<LocalWallet, SignerError> {
    private_key
        .parse::<LocalWallet>()
        .map_err(|e| SignerError::InvalidKey(e.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SponsorRequest {
    pub sender: Address,
    pub nonce: U256,
    pub call_data_hash: H256,
    pub authorizer: Address,
    pub chain_id: u64,
}

impl SponsorRequest {
    pub fn from_operation(op: &UserOperation, authorizer: Address, chain_id: u64) -> Self {
        let input = OperationDigestInput::from_operation(op);
        Self {
            sender: input.sender,
            nonce: input.nonce,
            call_data_hash: input.call_data_hash,
            authorizer,
            chain_id,
        }
    }

    fn digest_input(&self) -> OperationDigestInput {
        OperationDigestInput {
            sender: self.sender,
            nonce: self.nonce,
            call_data_hash: self.call_data_hash,
        }
    }
}

/// How the window of a fresh authorization is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    pub clock_skew: u64,
    pub ttl: u64,
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self { clock_skew: DEFAULT_CLOCK_SKEW, ttl: DEFAULT_TTL }
    }
}

impl WindowPolicy {
    /// Window for an authorization issued at `now`.
    pub fn window_at(&self, now: u64) -> Result<ValidityWindow, SignerError> {
        let valid_after = now.saturating_sub(self.clock_skew);
        let valid_until = now.saturating_add(self.ttl);

        Ok(ValidityWindow::new(valid_after, valid_until)?)
    }

    /// Placeholder authorization for gas estimation.
    ///
    /// Sender, nonce and call payload are unknown at this point so nothing is
    /// signed; the signature is [`stub_signature`]. Not valid for execution.
    pub fn stub_at(&self, now: u64) -> Result<PaymasterData, SignerError> {
        let window = self.window_at(now)?;
        debug!("Issued stub authorization valid [{}, {})", window.valid_after(), window.valid_until());

        Ok(PaymasterData { window, signature: stub_signature() })
    }

    /// [`WindowPolicy::stub_at`] wrapped in layout B.
    pub fn stub_packed_at(
        &self,
        authorizer: Address,
        gas: PaymasterGasLimits,
        now: u64,
    ) -> Result<PaymasterAndData, SignerError> {
        Ok(PaymasterAndData {
            authorizer,
            verification_gas_limit: gas.verification_gas_limit,
            post_op_gas_limit: gas.post_op_gas_limit,
            data: self.stub_at(now)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymasterGasLimits {
    pub verification_gas_limit: u128,
    pub post_op_gas_limit: u128,
}

/// Off-chain authority: picks a window and signs authorizations.
///
/// Holds no per-request state; every method takes `&self` and may be called
/// concurrently.
#[derive(Clone)]
pub struct SignerService {
    backend: Arc<dyn AuthorizationSigner>,
    domain_name: String,
    domain_version: String,
    policy: WindowPolicy,
}

impl SignerService {
    pub fn new(backend: Arc<dyn AuthorizationSigner>) -> Self {
        Self {
            backend,
            domain_name: DEFAULT_DOMAIN_NAME.to_string(),
            domain_version: DEFAULT_DOMAIN_VERSION.to_string(),
            policy: WindowPolicy::default(),
        }
    }

    pub fn with_domain(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.domain_name = name.into();
        self.domain_version = version.into();
        self
    }

    pub fn with_clock_skew(mut self, seconds: u64) -> Self {
        self.policy.clock_skew = seconds;
        self
    }

    pub fn with_ttl(mut self, seconds: u64) -> Self {
        self.policy.ttl = seconds;
        self
    }

    pub fn address(&self) -> Address {
        self.backend.address()
    }

    pub fn policy(&self) -> WindowPolicy {
        self.policy
    }

    pub fn window_at(&self, now: u64) -> Result<ValidityWindow, SignerError> {
        self.policy.window_at(now)
    }

    pub fn digest_builder(&self, authorizer: Address, chain_id: u64) -> DigestBuilder {
        DigestBuilder::new(
            AuthorizerDomain::new(chain_id, authorizer)
                .with_name(self.domain_name.clone())
                .with_version(self.domain_version.clone()),
        )
    }

    pub async fn sign(&self, request: &SponsorRequest) -> Result<PaymasterData, SignerError> {
        self.sign_at(request, unix_now()?).await
    }

    /// Signs `request` with the typed scheme and a window issued at `now`.
    pub async fn sign_at(
        &self,
        request: &SponsorRequest,
        now: u64,
    ) -> Result<PaymasterData, SignerError> {
        let window = self.window_at(now)?;
        let digest = self
            .digest_builder(request.authorizer, request.chain_id)
            .digest(&request.digest_input(), window);

        let signature = self.sign_checked(digest).await?;

        info!(
            "Signed authorization for {:?} nonce {} valid [{}, {})",
            request.sender,
            request.nonce,
            window.valid_after(),
            window.valid_until()
        );

        Ok(PaymasterData { window, signature })
    }

    pub async fn sign_packed_at(
        &self,
        request: &SponsorRequest,
        gas: PaymasterGasLimits,
        now: u64,
    ) -> Result<PaymasterAndData, SignerError> {
        let data = self.sign_at(request, now).await?;

        Ok(PaymasterAndData {
            authorizer: request.authorizer,
            verification_gas_limit: gas.verification_gas_limit,
            post_op_gas_limit: gas.post_op_gas_limit,
            data,
        })
    }

    /// Signs with the legacy plain scheme. Only for compatibility checks: the
    /// result is valid for every operation of `sender` inside the window.
    pub async fn sign_legacy_at(
        &self,
        sender: Address,
        authorizer: Address,
        chain_id: u64,
        now: u64,
    ) -> Result<PaymasterData, SignerError> {
        let window = self.window_at(now)?;
        let digest = self.digest_builder(authorizer, chain_id).legacy_digest(sender, window);
        let signature = self.sign_checked(digest).await?;

        Ok(PaymasterData { window, signature })
    }

    /// See [`WindowPolicy::stub_at`]; the backend is not involved.
    pub fn stub_at(&self, now: u64) -> Result<PaymasterData, SignerError> {
        self.policy.stub_at(now)
    }

    pub fn stub_packed_at(
        &self,
        authorizer: Address,
        gas: PaymasterGasLimits,
        now: u64,
    ) -> Result<PaymasterAndData, SignerError> {
        self.policy.stub_packed_at(authorizer, gas, now)
    }

    async fn sign_checked(&self, digest: H256) -> Result<[u8; SIGNATURE_LENGTH], SignerError> {
        let signature = self.backend.sign_digest(digest).await.map_err(|e| {
            error!("Signing backend failed: {}", e);
            e
        })?;
        let signature = <[u8; SIGNATURE_LENGTH]>::from(&signature);

        let expected = self.backend.address();
        match recover_signer(digest, &signature) {
            Some(recovered) if recovered == expected => Ok(signature),
            recovered => {
                let recovered = recovered.unwrap_or_default();
                error!("Backend signature recovers to {:?} instead of {:?}", recovered, expected);
                Err(SignerError::SelfCheckFailed { expected, recovered })
            }
        }
    }
}

pub fn unix_now() -> Result<u64, SignerError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .map_err(|e| SignerError::Clock(e.to_string()))
}
