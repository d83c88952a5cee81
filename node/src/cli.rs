//! # CLI Interface
//!
//! Command-line structure for the `keyward` binary, via `clap` derive.
//! Every `run` flag can also come from a `KEYWARD_*` environment variable,
//! which is how secrets are expected to arrive in production.

use clap::{ArgGroup, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use keyward_gateway::config::{
    DEFAULT_METRICS_PORT, DEFAULT_POLICY_PATH, DEFAULT_PORT, DEFAULT_POLICY_TIMEOUT,
};

use crate::logging::LogFormat;

/// Keyward custody signing gateway.
///
/// Holds one private key, signs and broadcasts transactions on behalf of
/// callers, and asks a Lua policy script before every signature.
#[derive(Parser, Debug)]
#[command(
    name = "keyward",
    about = "Policy-gated custody signing gateway for EVM chains",
    version,
    propagate_version = true
)]
pub struct KeywardCli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the gateway.
    Run(RunArgs),
    /// Evaluate a policy file against a single transaction and print the verdict.
    CheckPolicy(CheckPolicyArgs),
    /// Print version information and exit.
    Version,
}

/// How nonces for the custody account are assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum NonceStrategy {
    /// Ask the node for the pending nonce on every request.
    Chain,
    /// Seed once from the node, then count in memory.
    Local,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
#[command(group(ArgGroup::new("key").required(true).args(["private_key", "keystore"])))]
pub struct RunArgs {
    /// Ethereum JSON-RPC endpoint.
    #[arg(long, env = "KEYWARD_RPC_URL", default_value = "http://127.0.0.1:8545")]
    pub rpc_url: String,

    /// Hex-encoded custody private key.
    ///
    /// Prefer the environment variable or a keystore; flags end up in shell
    /// history and process listings.
    #[arg(long, env = "KEYWARD_PRIVATE_KEY", hide_env_values = true)]
    pub private_key: Option<String>,

    /// Encrypted JSON keystore holding the custody key.
    #[arg(long, env = "KEYWARD_KEYSTORE", requires = "passphrase")]
    pub keystore: Option<PathBuf>,

    /// Passphrase for `--keystore`.
    #[arg(long, env = "KEYWARD_PASSPHRASE", hide_env_values = true)]
    pub passphrase: Option<String>,

    /// Chain id to sign for. Queried from the node when omitted.
    #[arg(long, env = "KEYWARD_CHAIN_ID")]
    pub chain_id: Option<u64>,

    /// Lua policy file. Re-read on SIGHUP.
    #[arg(long, env = "KEYWARD_POLICY", default_value = DEFAULT_POLICY_PATH)]
    pub policy: PathBuf,

    /// Policy evaluation deadline in milliseconds.
    #[arg(long, env = "KEYWARD_POLICY_TIMEOUT_MS", default_value_t = DEFAULT_POLICY_TIMEOUT.as_millis() as u64)]
    pub policy_timeout_ms: u64,

    /// Directory for the transaction ledger. Created if missing.
    #[arg(long, short = 'd', env = "KEYWARD_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Port for the proxy API.
    #[arg(long, env = "KEYWARD_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "KEYWARD_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    #[arg(long, env = "KEYWARD_NONCE_STRATEGY", value_enum, default_value_t = NonceStrategy::Chain)]
    pub nonce_strategy: NonceStrategy,

    /// Basic-auth user for the proxy routes. Auth is off unless both user
    /// and password are set.
    #[arg(long, env = "KEYWARD_BASIC_AUTH_USER", requires = "basic_auth_pass")]
    pub basic_auth_user: Option<String>,

    #[arg(long, env = "KEYWARD_BASIC_AUTH_PASS", hide_env_values = true, requires = "basic_auth_user")]
    pub basic_auth_pass: Option<String>,

    #[arg(long, env = "KEYWARD_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

/// Arguments for the `check-policy` subcommand.
#[derive(Parser, Debug)]
pub struct CheckPolicyArgs {
    /// Lua policy file to evaluate.
    #[arg(long, default_value = DEFAULT_POLICY_PATH)]
    pub policy: PathBuf,

    /// Destination address. Omit for a contract deployment.
    #[arg(long)]
    pub to: Option<String>,

    /// Amount in wei, decimal.
    #[arg(long, default_value = "0")]
    pub value: String,

    /// Hex calldata.
    #[arg(long, default_value = "")]
    pub data: String,

    #[arg(long, default_value_t = DEFAULT_POLICY_TIMEOUT.as_millis() as u64)]
    pub policy_timeout_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        KeywardCli::command().debug_assert();
    }

    #[test]
    fn run_requires_a_key() {
        let res = KeywardCli::try_parse_from(["keyward", "run"]);
        assert!(res.is_err());
    }

    #[test]
    fn run_defaults() {
        let cli = KeywardCli::try_parse_from(["keyward", "run", "--private-key", "0x01"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.port, DEFAULT_PORT);
        assert_eq!(args.metrics_port, DEFAULT_METRICS_PORT);
        assert_eq!(args.nonce_strategy, NonceStrategy::Chain);
        assert_eq!(args.policy, PathBuf::from(DEFAULT_POLICY_PATH));
        assert_eq!(args.policy_timeout_ms, 250);
        assert!(args.chain_id.is_none());
    }

    #[test]
    fn keystore_needs_passphrase() {
        let res = KeywardCli::try_parse_from(["keyward", "run", "--keystore", "key.json"]);
        assert!(res.is_err());
    }

    #[test]
    fn basic_auth_needs_both_halves() {
        let res = KeywardCli::try_parse_from([
            "keyward",
            "run",
            "--private-key",
            "0x01",
            "--basic-auth-user",
            "ops",
        ]);
        assert!(res.is_err());
    }

    #[test]
    fn parses_check_policy() {
        let cli = KeywardCli::try_parse_from([
            "keyward",
            "check-policy",
            "--policy",
            "rules.lua",
            "--value",
            "10",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::CheckPolicy(_)));
    }
}
