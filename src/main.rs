// src/main.rs
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use ethers::types::{Address, U256};
use serde_json::json;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use arka_sponsor::digest::{DEFAULT_DOMAIN_NAME, DEFAULT_DOMAIN_VERSION};
use arka_sponsor::signer::{unix_now, wallet_from_key, WindowPolicy, DEFAULT_CLOCK_SKEW, DEFAULT_TTL};
use arka_sponsor::types::PaymasterResponse;
use arka_sponsor::{
    AuthorizerDomain, ConfigStore, CostCapPolicy, PaymasterAndData, PaymasterGasLimits,
    SignerService, SponsorRequest, UserOperation, ValidationEngine,
};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(long, default_value = "info")]
    log_level: Level,

    #[clap(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct DomainArgs {
    #[clap(short, long, env = "PAYMASTER_CHAIN_ID")]
    chain_id: u64,

    /// Address of the authorizer (paymaster) contract.
    #[clap(short, long, env = "PAYMASTER_ADDRESS")]
    authorizer: Address,

    #[clap(long, env = "PAYMASTER_DOMAIN_NAME", default_value = DEFAULT_DOMAIN_NAME)]
    domain_name: String,

    #[clap(long, env = "PAYMASTER_DOMAIN_VERSION", default_value = DEFAULT_DOMAIN_VERSION)]
    domain_version: String,
}

impl DomainArgs {
    fn domain(&self) -> AuthorizerDomain {
        AuthorizerDomain::new(self.chain_id, self.authorizer)
            .with_name(self.domain_name.clone())
            .with_version(self.domain_version.clone())
    }
}

#[derive(clap::Args, Debug)]
struct PolicyArgs {
    #[clap(long, default_value_t = DEFAULT_TTL)]
    ttl: u64,

    #[clap(long, default_value_t = DEFAULT_CLOCK_SKEW)]
    clock_skew: u64,

    #[clap(long, default_value_t = 100_000)]
    verification_gas_limit: u128,

    #[clap(long, default_value_t = 50_000)]
    post_op_gas_limit: u128,
}

impl PolicyArgs {
    fn window(&self) -> WindowPolicy {
        WindowPolicy { clock_skew: self.clock_skew, ttl: self.ttl }
    }

    fn gas(&self) -> PaymasterGasLimits {
        PaymasterGasLimits {
            verification_gas_limit: self.verification_gas_limit,
            post_op_gas_limit: self.post_op_gas_limit,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the verifying identity of the signing key.
    Address {
        #[clap(short, long, env = "PAYMASTER_PRIVATE_KEY", hide_env_values = true)]
        private_key: String,
    },

    /// Sign an authorization for the operation in a JSON file.
    Sign {
        #[clap(short, long, env = "PAYMASTER_PRIVATE_KEY", hide_env_values = true)]
        private_key: String,

        #[clap(flatten)]
        domain: DomainArgs,

        #[clap(flatten)]
        policy: PolicyArgs,

        #[clap(short, long)]
        operation: PathBuf,
    },

    /// Emit a placeholder authorization for gas estimation. Not valid for execution.
    Stub {
        #[clap(short, long, env = "PAYMASTER_ADDRESS")]
        authorizer: Address,

        #[clap(flatten)]
        policy: PolicyArgs,
    },

    /// Validate the paymasterAndData carried by the operation in a JSON file.
    Validate {
        #[clap(flatten)]
        domain: DomainArgs,

        /// Config record (JSON, any schema version).
        #[clap(long)]
        config: PathBuf,

        #[clap(short, long)]
        operation: PathBuf,

        /// Cost in wei; defaults to the operation's maximum gas cost.
        #[clap(long)]
        requested_cost: Option<u128>,

        /// Unix timestamp; defaults to the system clock.
        #[clap(long)]
        now: Option<u64>,

        /// Decline over-cap requests instead of aborting them.
        #[clap(long)]
        decline_over_cap: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // Parse command line arguments
    let args = Args::parse();

    // Logs go to stderr so stdout stays machine readable
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let output = match args.command {
        Command::Address { private_key } => {
            let service = SignerService::new(Arc::new(wallet_from_key(&private_key)?));
            json!({ "verifyingIdentity": service.address() })
        }
        Command::Sign { private_key, domain, policy, operation } => {
            let service = SignerService::new(Arc::new(wallet_from_key(&private_key)?))
                .with_domain(domain.domain_name.clone(), domain.domain_version.clone())
                .with_ttl(policy.ttl)
                .with_clock_skew(policy.clock_skew);
            let op = read_operation(&operation)?;
            info!("Signing authorization for {:?} as {:?}", op.sender, service.address());

            let request = SponsorRequest::from_operation(&op, domain.authorizer, domain.chain_id);
            let packed = service.sign_packed_at(&request, policy.gas(), unix_now()?).await?;
            serde_json::to_value(response(&packed))?
        }
        Command::Stub { authorizer, policy } => {
            let packed = policy.window().stub_packed_at(authorizer, policy.gas(), unix_now()?)?;
            serde_json::to_value(response(&packed))?
        }
        Command::Validate {
            domain,
            config,
            operation,
            requested_cost,
            now,
            decline_over_cap,
        } => {
            let store = ConfigStore::from_path(&config)
                .with_context(|| format!("loading config from {}", config.display()))?;
            let op = read_operation(&operation)?;
            let now = match now {
                Some(now) => now,
                None => unix_now()?,
            };
            let requested_cost = match requested_cost {
                Some(cost) => U256::from(cost),
                None => default_requested_cost(&op)?,
            };
            let policy = if decline_over_cap { CostCapPolicy::Decline } else { CostCapPolicy::Abort };

            let engine = ValidationEngine::new(domain.domain()).with_cost_cap_policy(policy);
            validation_report(&engine, &store, &op, requested_cost, now)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}

fn read_operation(path: &Path) -> anyhow::Result<UserOperation> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading operation from {}", path.display()))?;
    serde_json::from_str(&raw).context("parsing operation")
}

fn default_requested_cost(op: &UserOperation) -> anyhow::Result<U256> {
    let paymaster_gas = PaymasterAndData::decode(&op.paymaster_and_data)
        .map(|packed| U256::from(packed.verification_gas_limit) + U256::from(packed.post_op_gas_limit))
        .unwrap_or_default();

    op.max_gas_cost(paymaster_gas).context("max gas cost overflows")
}

fn validation_report(
    engine: &ValidationEngine,
    store: &ConfigStore,
    op: &UserOperation,
    requested_cost: U256,
    now: u64,
) -> anyhow::Result<serde_json::Value> {
    let config = store.snapshot()?;
    let result = engine.validate_packed(op, requested_cost, &config, now);
    info!("Validation of {:?} nonce {}: {}", op.sender, op.nonce, result.status());

    Ok(match result.window() {
        Some(window) => json!({
            "status": result.status(),
            "validAfter": window.valid_after(),
            "validUntil": window.valid_until(),
            "window": window.status_at(now),
        }),
        None => json!({ "status": result.status() }),
    })
}

fn response(packed: &PaymasterAndData) -> PaymasterResponse {
    PaymasterResponse {
        paymaster_and_data: packed.encode(),
        valid_after: packed.data.window.valid_after(),
        valid_until: packed.data.window.valid_until(),
    }
}
