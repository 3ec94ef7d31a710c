// src/digest.rs
//! Digests signed by the authority and rebuilt by the validator.
//!
//! The typed scheme is the one used for every new authorization:
//!
//! ```text
//! keccak256(0x19 0x01 ‖ domainSeparator ‖ keccak256(abi.encode(typeHash, validUntil, validAfter, sender, nonce, callDataHash)))
//! ```
//!
//! The legacy scheme only exists so old authorizations can be checked in tests.
//! It binds neither the nonce nor the call payload, so one signature covers every
//! operation of the sender inside the window.
use ethers::abi::{encode, Token};
use ethers::types::transaction::eip712::EIP712Domain;
use ethers::types::{Address, H256, U256};
use ethers::utils::{hash_message, keccak256};

use crate::types::{UserOperation, ValidityWindow};

pub const DEFAULT_DOMAIN_NAME: &str = "ArkaPaymaster";
pub const DEFAULT_DOMAIN_VERSION: &str = "1";

/// Type tag of the signed struct. Field order is part of the wire contract.
pub const AUTHORIZATION_TYPE: &str = "PaymasterAuthorization(uint48 validUntil,uint48 validAfter,address sender,uint256 nonce,bytes32 callDataHash)";

/// Identifies the authorizer a signature is minted for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizerDomain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub authorizer: Address,
}

impl AuthorizerDomain {
    pub fn new(chain_id: u64, authorizer: Address) -> Self {
        Self {
            name: DEFAULT_DOMAIN_NAME.to_string(),
            version: DEFAULT_DOMAIN_VERSION.to_string(),
            chain_id,
            authorizer,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn separator(&self) -> H256 {
        let domain = EIP712Domain {
            name: Some(self.name.clone()),
            version: Some(self.version.clone()),
            chain_id: Some(U256::from(self.chain_id)),
            verifying_contract: Some(self.authorizer),
            salt: None,
        };

        H256(domain.separator())
    }
}

/// Operation fields bound by the typed digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationDigestInput {
    pub sender: Address,
    pub nonce: U256,
    pub call_data_hash: H256,
}

impl OperationDigestInput {
    /// Takes every field from the operation as received.
    pub fn from_operation(op: &UserOperation) -> Self {
        Self {
            sender: op.sender,
            nonce: op.nonce,
            call_data_hash: op.call_data_hash(),
        }
    }
}

/// Builds digests for one domain. The domain separator is computed once.
#[derive(Debug, Clone)]
pub struct DigestBuilder {
    domain: AuthorizerDomain,
    separator: H256,
    type_hash: H256,
}

impl DigestBuilder {
    pub fn new(domain: AuthorizerDomain) -> Self {
        let separator = domain.separator();
        Self {
            domain,
            separator,
            type_hash: H256(keccak256(AUTHORIZATION_TYPE)),
        }
    }

    pub fn domain(&self) -> &AuthorizerDomain {
        &self.domain
    }

    pub fn domain_separator(&self) -> H256 {
        self.separator
    }

    pub fn struct_hash(&self, input: &OperationDigestInput, window: ValidityWindow) -> H256 {
        let encoded = encode(&[
            Token::FixedBytes(self.type_hash.as_bytes().to_vec()),
            Token::Uint(U256::from(window.valid_until())),
            Token::Uint(U256::from(window.valid_after())),
            Token::Address(input.sender),
            Token::Uint(input.nonce),
            Token::FixedBytes(input.call_data_hash.as_bytes().to_vec()),
        ]);

        H256(keccak256(encoded))
    }

    /// Digest of the typed scheme; this is what gets signed and recovered.
    pub fn digest(&self, input: &OperationDigestInput, window: ValidityWindow) -> H256 {
        let mut message = Vec::with_capacity(2 + 32 + 32);
        message.extend_from_slice(&[0x19, 0x01]);
        message.extend_from_slice(self.separator.as_bytes());
        message.extend_from_slice(self.struct_hash(input, window).as_bytes());

        H256(keccak256(message))
    }

    /// Digest of the legacy scheme, already wrapped with the personal-message prefix.
    pub fn legacy_digest(&self, sender: Address, window: ValidityWindow) -> H256 {
        let encoded = encode(&[
            Token::Uint(U256::from(window.valid_until())),
            Token::Uint(U256::from(window.valid_after())),
            Token::Uint(U256::from(self.domain.chain_id)),
            Token::Address(self.domain.authorizer),
            Token::Address(sender),
        ]);

        hash_message(keccak256(encoded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h256(value: &str) -> H256 {
        H256::from_slice(&hex::decode(value).unwrap())
    }

    fn authorizer() -> Address {
        "0x5FbDB2315678afecb367f032d93F642f64180aa3".parse().unwrap()
    }

    fn input() -> OperationDigestInput {
        OperationDigestInput {
            sender: Address::repeat_byte(0xaa),
            nonce: U256::from(5u64),
            call_data_hash: H256(keccak256([0xdeu8, 0xad, 0xbe, 0xef])),
        }
    }

    fn window() -> ValidityWindow {
        ValidityWindow::new(1000, 4600).unwrap()
    }

    fn builder() -> DigestBuilder {
        DigestBuilder::new(AuthorizerDomain::new(31337, authorizer()))
    }

    #[test]
    fn type_hash_matches_type_tag() {
        assert_eq!(
            builder().type_hash,
            h256("be535e887dd2acd0e19e97c729fecd23f7e6ce91bac9afff8b7ac5e03cf28bb8")
        );
    }

    #[test]
    fn domain_separator_golden_vector() {
        assert_eq!(
            builder().domain_separator(),
            h256("acbab5143b682bb967d58560adf63be28938541a829ceda7f999ed01726e185c")
        );
    }

    #[test]
    fn eip712_reference_domain() {
        // Domain from the EIP-712 "Ether Mail" example.
        let domain = AuthorizerDomain::new(
            1,
            "0xCcCCccccCCCCcCCCCCCcCcCccCcCCCcCcccccccC".parse().unwrap(),
        )
        .with_name("Ether Mail")
        .with_version("1");

        assert_eq!(
            domain.separator(),
            h256("f2cee375fa42b42143804025fc449deafd50cc031ca257e0b194a650a912090f")
        );
    }

    #[test]
    fn typed_digest_golden_vector() {
        let builder = builder();

        assert_eq!(
            builder.struct_hash(&input(), window()),
            h256("c9009cfea86926e6c9a8f3363f356626463cf9b76499a80323b0cb645358c77e")
        );
        assert_eq!(
            builder.digest(&input(), window()),
            h256("8b1dc06302758898e4ba1d9531a258c5b1a4443449b4e2d76c77ce6caee03f04")
        );
    }

    #[test]
    fn legacy_digest_golden_vector() {
        assert_eq!(
            builder().legacy_digest(Address::repeat_byte(0xaa), window()),
            h256("d8c74728b7fa97613cafaba816d74e020014beaac11880f6e914262c88445e33")
        );
    }

    #[test]
    fn digest_is_deterministic() {
        assert_eq!(builder().digest(&input(), window()), builder().digest(&input(), window()));
    }

    #[test]
    fn every_bound_field_changes_the_digest() {
        let base = builder().digest(&input(), window());

        let variants = [
            OperationDigestInput { sender: Address::repeat_byte(0xab), ..input() },
            OperationDigestInput { nonce: U256::from(6u64), ..input() },
            OperationDigestInput { call_data_hash: H256(keccak256([0u8])), ..input() },
        ];
        for variant in variants {
            assert_ne!(builder().digest(&variant, window()), base);
        }

        let domains = [
            AuthorizerDomain::new(1, authorizer()),
            AuthorizerDomain::new(31337, Address::repeat_byte(0x01)),
            AuthorizerDomain::new(31337, authorizer()).with_version("2"),
            AuthorizerDomain::new(31337, authorizer()).with_name("OtherPaymaster"),
        ];
        for domain in domains {
            assert_ne!(DigestBuilder::new(domain).digest(&input(), window()), base);
        }

        let shifted = ValidityWindow::new(1000, 4601).unwrap();
        assert_ne!(builder().digest(&input(), shifted), base);
    }

    #[test]
    fn legacy_digest_is_bound_to_domain_but_not_to_the_call() {
        let sender = input().sender;
        let legacy = builder().legacy_digest(sender, window());

        assert_ne!(legacy, builder().digest(&input(), window()));
        assert_ne!(
            DigestBuilder::new(AuthorizerDomain::new(1, authorizer())).legacy_digest(sender, window()),
            legacy
        );
        assert_ne!(builder().legacy_digest(Address::repeat_byte(0xab), window()), legacy);
    }
}
