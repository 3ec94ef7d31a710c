// src/validation.rs
use ethers::types::U256;
use tracing::{debug, warn};

use crate::codec;
use crate::config::Config;
use crate::digest::{AuthorizerDomain, DigestBuilder, OperationDigestInput};
use crate::signer::recover_signer;
use crate::types::{CostCapPolicy, PaymasterAndData, PaymasterData, UserOperation, ValidationResult};

/// Which digest the signature is checked against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DigestScheme {
    /// Domain-separated digest binding nonce and call payload.
    #[default]
    Typed,
    /// Plain digest over window, chain, authorizer and sender only.
    Legacy,
}

/// Checks authorizations attached to operations.
///
/// Pure and synchronous: no I/O, no shared mutable state. The caller supplies
/// the config snapshot and the current time on every call.
#[derive(Debug, Clone)]
pub struct ValidationEngine {
    digests: DigestBuilder,
    cost_cap_policy: CostCapPolicy,
    scheme: DigestScheme,
}

impl ValidationEngine {
    pub fn new(domain: AuthorizerDomain) -> Self {
        Self {
            digests: DigestBuilder::new(domain),
            cost_cap_policy: CostCapPolicy::default(),
            scheme: DigestScheme::default(),
        }
    }

    pub fn with_cost_cap_policy(mut self, policy: CostCapPolicy) -> Self {
        self.cost_cap_policy = policy;
        self
    }

    pub fn with_digest_scheme(mut self, scheme: DigestScheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn domain(&self) -> &AuthorizerDomain {
        self.digests.domain()
    }

    /// Validates layout-A `paymaster_data` for `op`.
    ///
    /// Only the window and the signature are read from `paymaster_data`; every
    /// digest field comes from `op` and the engine's domain. The returned window
    /// is the decoded one, untouched. Comparing it against `now` is the caller's
    /// job; `now` is only used here to label rejections in logs.
    pub fn validate(
        &self,
        op: &UserOperation,
        paymaster_data: &[u8],
        requested_cost: U256,
        config: &Config,
        now: u64,
    ) -> ValidationResult {
        match codec::decode(paymaster_data) {
            Ok(data) => self.check(op, &data, requested_cost, config, now),
            Err(e) => {
                warn!("Malformed paymaster data for {:?}: {}", op.sender, e);
                ValidationResult::Malformed
            }
        }
    }

    /// Validates the layout-B payload carried in `op.paymaster_and_data`.
    ///
    /// The embedded authorizer must be the one this engine verifies for.
    pub fn validate_packed(
        &self,
        op: &UserOperation,
        requested_cost: U256,
        config: &Config,
        now: u64,
    ) -> ValidationResult {
        let packed = match PaymasterAndData::decode(&op.paymaster_and_data) {
            Ok(packed) => packed,
            Err(e) => {
                warn!("Malformed paymasterAndData for {:?}: {}", op.sender, e);
                return ValidationResult::Malformed;
            }
        };

        if packed.authorizer != self.domain().authorizer {
            warn!(
                "paymasterAndData names authorizer {:?}, expected {:?}",
                packed.authorizer,
                self.domain().authorizer
            );
            return ValidationResult::Malformed;
        }

        self.check(op, &packed.data, requested_cost, config, now)
    }

    fn check(
        &self,
        op: &UserOperation,
        data: &PaymasterData,
        requested_cost: U256,
        config: &Config,
        now: u64,
    ) -> ValidationResult {
        let window = data.window;
        let digest = match self.scheme {
            DigestScheme::Typed => {
                self.digests.digest(&OperationDigestInput::from_operation(op), window)
            }
            DigestScheme::Legacy => self.digests.legacy_digest(op.sender, window),
        };
        debug!("Rebuilt digest {:?} for {:?} nonce {}", digest, op.sender, op.nonce);

        let recovered = recover_signer(digest, &data.signature);
        if recovered != Some(config.verifying_identity) {
            warn!(
                "Signature for {:?} recovers to {:?}, expected {:?} (window {:?} at {})",
                op.sender,
                recovered,
                config.verifying_identity,
                window.status_at(now),
                now
            );
            return ValidationResult::SignatureRejected(window);
        }

        if requested_cost > config.max_allowed_cost {
            warn!(
                "Requested cost {} for {:?} exceeds cap {}",
                requested_cost, op.sender, config.max_allowed_cost
            );
            return match self.cost_cap_policy {
                CostCapPolicy::Abort => ValidationResult::CostExceeded,
                CostCapPolicy::Decline => ValidationResult::SignatureRejected(window),
            };
        }

        debug!("Accepted {:?} nonce {} (window {:?} at {})", op.sender, op.nonce, window.status_at(now), now);
        ValidationResult::Accepted(window)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ethers::types::{Address, Bytes};

    use super::*;
    use crate::signer::tests::TEST_KEY;
    use crate::signer::{wallet_from_key, PaymasterGasLimits, SignerService, SponsorRequest};
    use crate::types::{ValidityWindow, WindowStatus};

    const CHAIN_ID: u64 = 31337;
    const NOW: u64 = 1005;

    fn authorizer() -> Address {
        Address::repeat_byte(0x5f)
    }

    fn service() -> SignerService {
        SignerService::new(Arc::new(wallet_from_key(TEST_KEY).unwrap()))
            .with_clock_skew(5)
            .with_ttl(3595)
    }

    fn engine() -> ValidationEngine {
        ValidationEngine::new(AuthorizerDomain::new(CHAIN_ID, authorizer()))
    }

    fn config() -> Config {
        Config {
            owner: Address::repeat_byte(0x01),
            verifying_identity: service().address(),
            max_allowed_cost: U256::from(1_000_000u64),
            revision: 0,
        }
    }

    fn operation() -> UserOperation {
        UserOperation {
            sender: Address::repeat_byte(0xaa),
            nonce: U256::from(5u64),
            call_data: Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]),
            ..Default::default()
        }
    }

    async fn signed(op: &UserOperation) -> Bytes {
        let request = SponsorRequest::from_operation(op, authorizer(), CHAIN_ID);
        service().sign_at(&request, NOW).await.unwrap().encode()
    }

    fn window() -> ValidityWindow {
        ValidityWindow::new(1000, 4600).unwrap()
    }

    #[tokio::test]
    async fn accepts_matching_operation() {
        let op = operation();
        let data = signed(&op).await;

        let result = engine().validate(&op, &data, U256::from(10u64), &config(), NOW);
        assert_eq!(result, ValidationResult::Accepted(window()));
    }

    #[tokio::test]
    async fn rejects_replay_on_other_nonce_or_payload() {
        let op = operation();
        let data = signed(&op).await;

        let other_nonce = UserOperation { nonce: U256::from(6u64), ..operation() };
        assert_eq!(
            engine().validate(&other_nonce, &data, U256::one(), &config(), NOW),
            ValidationResult::SignatureRejected(window())
        );

        let other_call = UserOperation { call_data: Bytes::from(vec![0x00]), ..operation() };
        assert_eq!(
            engine().validate(&other_call, &data, U256::one(), &config(), NOW),
            ValidationResult::SignatureRejected(window())
        );

        let other_sender = UserOperation { sender: Address::repeat_byte(0xab), ..operation() };
        assert_eq!(
            engine().validate(&other_sender, &data, U256::one(), &config(), NOW),
            ValidationResult::SignatureRejected(window())
        );
    }

    #[tokio::test]
    async fn rejects_signature_from_other_domain() {
        let op = operation();
        let data = signed(&op).await;

        let engines = [
            ValidationEngine::new(AuthorizerDomain::new(1, authorizer())),
            ValidationEngine::new(AuthorizerDomain::new(CHAIN_ID, Address::repeat_byte(0x60))),
            ValidationEngine::new(AuthorizerDomain::new(CHAIN_ID, authorizer()).with_version("2")),
        ];
        for engine in engines {
            assert_eq!(
                engine.validate(&op, &data, U256::one(), &config(), NOW),
                ValidationResult::SignatureRejected(window())
            );
        }
    }

    #[tokio::test]
    async fn rejects_unexpected_signer() {
        let op = operation();
        let data = signed(&op).await;
        let config = Config { verifying_identity: Address::repeat_byte(0x07), ..config() };

        assert_eq!(
            engine().validate(&op, &data, U256::one(), &config, NOW),
            ValidationResult::SignatureRejected(window())
        );
    }

    #[tokio::test]
    async fn cost_cap_boundary() {
        let op = operation();
        let data = signed(&op).await;
        let cap = config().max_allowed_cost;

        assert_eq!(
            engine().validate(&op, &data, cap, &config(), NOW),
            ValidationResult::Accepted(window())
        );
        assert_eq!(
            engine().validate(&op, &data, cap + U256::one(), &config(), NOW),
            ValidationResult::CostExceeded
        );
    }

    #[tokio::test]
    async fn decline_policy_keeps_the_window() {
        let op = operation();
        let data = signed(&op).await;
        let engine = engine().with_cost_cap_policy(CostCapPolicy::Decline);
        let over = config().max_allowed_cost + U256::one();

        assert_eq!(
            engine.validate(&op, &data, over, &config(), NOW),
            ValidationResult::SignatureRejected(window())
        );
    }

    #[tokio::test]
    async fn signature_is_checked_before_cost() {
        let op = operation();
        let data = signed(&op).await;
        let other = UserOperation { nonce: U256::from(6u64), ..operation() };
        let over = config().max_allowed_cost + U256::one();

        assert_eq!(
            engine().validate(&other, &data, over, &config(), NOW),
            ValidationResult::SignatureRejected(window())
        );
    }

    #[tokio::test]
    async fn expired_window_is_returned_unchanged() {
        let op = operation();
        let data = signed(&op).await;

        // validUntil == now and validUntil < now are both expired for the caller,
        // but the validator still reports exactly the signed window.
        for now in [4600, 4601, 1_000_000] {
            let result = engine().validate(&op, &data, U256::one(), &config(), now);
            assert_eq!(result, ValidationResult::Accepted(window()));
            assert_eq!(result.window().unwrap().status_at(now), WindowStatus::Expired);
        }
        let result = engine().validate(&op, &data, U256::one(), &config(), 999);
        assert_eq!(result.window().unwrap().status_at(999), WindowStatus::NotYetValid);
    }

    #[tokio::test]
    async fn returned_window_matches_the_decoded_bytes() {
        let op = operation();
        let data = signed(&op).await;
        let decoded = codec::decode(&data).unwrap().window;

        let accepted = engine().validate(&op, &data, U256::one(), &config(), NOW);
        let rejected = engine().validate(
            &UserOperation { nonce: U256::from(6u64), ..operation() },
            &data,
            U256::one(),
            &config(),
            NOW,
        );

        for result in [accepted, rejected] {
            let window = result.window().unwrap();
            assert_eq!(window, decoded);
            assert_eq!(&codec::encode(window, &[0u8; 65])[..12], &data[..12]);
        }
    }

    #[tokio::test]
    async fn malformed_payloads() {
        let op = operation();
        let data = signed(&op).await;

        for len in [0, 1, 12, 50, 76] {
            assert_eq!(
                engine().validate(&op, &data[..len], U256::one(), &config(), NOW),
                ValidationResult::Malformed
            );
        }
        let mut long = data.to_vec();
        long.push(0x1b);
        assert_eq!(
            engine().validate(&op, &long, U256::one(), &config(), NOW),
            ValidationResult::Malformed
        );
    }

    #[tokio::test]
    async fn malformed_wins_over_cost() {
        let op = operation();
        let over = config().max_allowed_cost + U256::one();

        assert_eq!(
            engine().validate(&op, &[0u8; 50], over, &config(), NOW),
            ValidationResult::Malformed
        );
    }

    #[tokio::test]
    async fn tampered_signature_is_rejected_not_malformed() {
        let op = operation();
        let mut data = signed(&op).await.to_vec();
        data[12 + 10] ^= 0x01;

        assert_eq!(
            engine().validate(&op, &data, U256::one(), &config(), NOW),
            ValidationResult::SignatureRejected(window())
        );
    }

    #[tokio::test]
    async fn stub_never_validates() {
        let stub = service().stub_at(NOW).unwrap().encode();

        assert_eq!(
            engine().validate(&operation(), &stub, U256::one(), &config(), NOW),
            ValidationResult::SignatureRejected(window())
        );
    }

    #[tokio::test]
    async fn packed_layout() {
        let gas = PaymasterGasLimits { verification_gas_limit: 100_000, post_op_gas_limit: 50_000 };
        let request = SponsorRequest::from_operation(&operation(), authorizer(), CHAIN_ID);
        let packed = service().sign_packed_at(&request, gas, NOW).await.unwrap();
        let op = UserOperation { paymaster_and_data: packed.encode(), ..operation() };

        assert_eq!(
            engine().validate_packed(&op, U256::one(), &config(), NOW),
            ValidationResult::Accepted(window())
        );

        let foreign = PaymasterAndData { authorizer: Address::repeat_byte(0x60), ..packed.clone() };
        let op = UserOperation { paymaster_and_data: foreign.encode(), ..operation() };
        assert_eq!(
            engine().validate_packed(&op, U256::one(), &config(), NOW),
            ValidationResult::Malformed
        );

        let op = UserOperation { paymaster_and_data: packed.data.encode(), ..operation() };
        assert_eq!(
            engine().validate_packed(&op, U256::one(), &config(), NOW),
            ValidationResult::Malformed
        );
    }

    #[tokio::test]
    async fn legacy_scheme_is_replayable_across_calls() {
        let data = service()
            .sign_legacy_at(operation().sender, authorizer(), CHAIN_ID, NOW)
            .await
            .unwrap()
            .encode();
        let legacy = engine().with_digest_scheme(DigestScheme::Legacy);
        let other = UserOperation { nonce: U256::from(6u64), call_data: Bytes::new(), ..operation() };

        assert!(legacy.validate(&operation(), &data, U256::one(), &config(), NOW).is_accepted());
        assert!(legacy.validate(&other, &data, U256::one(), &config(), NOW).is_accepted());

        // The typed engine never accepts a legacy signature.
        assert_eq!(
            engine().validate(&operation(), &data, U256::one(), &config(), NOW),
            ValidationResult::SignatureRejected(window())
        );
    }
}
