// src/config.rs
//! Owner-gated authority state.
//!
//! Readers take whole [`Config`] snapshots; every setter publishes a fresh
//! snapshot, so a validation in flight sees either the old or the new config.
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwapOption;
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ConfigError;

/// Highest `max_allowed_cost` the owner may set: 100 ether.
pub fn max_cost_ceiling() -> U256 {
    U256::exp10(20)
}

/// Cost cap given to records from before the cap existed: 1 ether.
pub fn default_max_allowed_cost() -> U256 {
    U256::exp10(18)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub owner: Address,
    pub verifying_identity: Address,
    pub max_allowed_cost: U256,
    /// Number of successful setter calls since initialization.
    pub revision: u64,
}

impl Config {
    pub fn to_stored(&self) -> StoredConfig {
        StoredConfig::V2 {
            owner: self.owner,
            verifying_identity: self.verifying_identity,
            max_allowed_cost: self.max_allowed_cost,
            revision: self.revision,
        }
    }
}

/// On-disk config record, tagged by schema version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "version")]
pub enum StoredConfig {
    /// First generation: no cost cap.
    #[serde(rename = "1", rename_all = "camelCase")]
    V1 { owner: Address, verifying_signer: Address },

    #[serde(rename = "2", rename_all = "camelCase")]
    V2 {
        owner: Address,
        verifying_identity: Address,
        max_allowed_cost: U256,
        #[serde(default)]
        revision: u64,
    },
}

impl StoredConfig {
    /// Upgrades the record to the current schema and checks it.
    pub fn migrate(self) -> Result<Config, ConfigError> {
        let config = match self {
            StoredConfig::V1 { owner, verifying_signer } => Config {
                owner,
                verifying_identity: verifying_signer,
                max_allowed_cost: default_max_allowed_cost(),
                revision: 0,
            },
            StoredConfig::V2 { owner, verifying_identity, max_allowed_cost, revision } => {
                Config { owner, verifying_identity, max_allowed_cost, revision }
            }
        };

        check_address(config.owner, "owner")?;
        check_address(config.verifying_identity, "verifying identity")?;
        check_max_cost(config.max_allowed_cost)?;

        Ok(config)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConfigField {
    Owner,
    VerifyingIdentity,
    MaxAllowedCost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Address(Address),
    Cost(U256),
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Address(address) => write!(f, "{address:?}"),
            ConfigValue::Cost(cost) => write!(f, "{cost}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigChange {
    pub field: ConfigField,
    pub old: ConfigValue,
    pub new: ConfigValue,
    pub revision: u64,
}

#[derive(Default)]
pub struct ConfigStore {
    current: ArcSwapOption<Config>,
    writer: Mutex<()>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_stored(stored: StoredConfig) -> Result<Self, ConfigError> {
        let config = stored.migrate()?;
        let store = Self::new();
        store.current.store(Some(Arc::new(config)));
        Ok(store)
    }

    /// Loads a JSON [`StoredConfig`] file, migrating older schema versions.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e.to_string()))?;
        let stored: StoredConfig =
            serde_json::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;

        Self::from_stored(stored)
    }

    /// Moves the store from uninitialized to active. Can only succeed once.
    pub fn initialize(
        &self,
        owner: Address,
        verifying_identity: Address,
        max_allowed_cost: U256,
    ) -> Result<Arc<Config>, ConfigError> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        if self.current.load().is_some() {
            return Err(ConfigError::AlreadyInitialized);
        }
        check_address(owner, "owner")?;
        check_address(verifying_identity, "verifying identity")?;
        check_max_cost(max_allowed_cost)?;

        let config = Arc::new(Config { owner, verifying_identity, max_allowed_cost, revision: 0 });
        self.current.store(Some(config.clone()));
        info!("Initialized config with owner {:?} and verifying identity {:?}", owner, verifying_identity);

        Ok(config)
    }

    pub fn snapshot(&self) -> Result<Arc<Config>, ConfigError> {
        self.current.load_full().ok_or(ConfigError::Uninitialized)
    }

    pub fn owner(&self) -> Result<Address, ConfigError> {
        Ok(self.snapshot()?.owner)
    }

    pub fn verifying_identity(&self) -> Result<Address, ConfigError> {
        Ok(self.snapshot()?.verifying_identity)
    }

    pub fn max_allowed_cost(&self) -> Result<U256, ConfigError> {
        Ok(self.snapshot()?.max_allowed_cost)
    }

    pub fn set_verifying_identity(
        &self,
        caller: Address,
        new: Address,
    ) -> Result<ConfigChange, ConfigError> {
        self.update(caller, ConfigField::VerifyingIdentity, |config| {
            check_address(new, "verifying identity")?;
            let old = std::mem::replace(&mut config.verifying_identity, new);
            Ok((ConfigValue::Address(old), ConfigValue::Address(new)))
        })
    }

    pub fn set_max_allowed_cost(&self, caller: Address, new: U256) -> Result<ConfigChange, ConfigError> {
        self.update(caller, ConfigField::MaxAllowedCost, |config| {
            check_max_cost(new)?;
            let old = std::mem::replace(&mut config.max_allowed_cost, new);
            Ok((ConfigValue::Cost(old), ConfigValue::Cost(new)))
        })
    }

    pub fn transfer_ownership(
        &self,
        caller: Address,
        new_owner: Address,
    ) -> Result<ConfigChange, ConfigError> {
        self.update(caller, ConfigField::Owner, |config| {
            check_address(new_owner, "owner")?;
            let old = std::mem::replace(&mut config.owner, new_owner);
            Ok((ConfigValue::Address(old), ConfigValue::Address(new_owner)))
        })
    }

    fn update<F>(&self, caller: Address, field: ConfigField, apply: F) -> Result<ConfigChange, ConfigError>
    where
        F: FnOnce(&mut Config) -> Result<(ConfigValue, ConfigValue), ConfigError>,
    {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let current = self.snapshot()?;
        if caller != current.owner {
            warn!("Rejected {:?} update from non-owner {:?}", field, caller);
            return Err(ConfigError::Unauthorized { caller });
        }

        let mut next = Config::clone(&current);
        let (old, new) = apply(&mut next)?;
        next.revision += 1;
        let revision = next.revision;
        self.current.store(Some(Arc::new(next)));

        info!("Config {:?} changed from {} to {} (revision {})", field, old, new, revision);

        Ok(ConfigChange { field, old, new, revision })
    }
}

impl fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigStore").field("current", &self.current.load_full()).finish()
    }
}

fn check_address(address: Address, what: &'static str) -> Result<(), ConfigError> {
    if address.is_zero() {
        return Err(ConfigError::InvalidAddress(what));
    }
    Ok(())
}

fn check_max_cost(cost: U256) -> Result<(), ConfigError> {
    if cost.is_zero() || cost > max_cost_ceiling() {
        return Err(ConfigError::InvalidMaxCost(cost));
    }
    Ok(())
}
