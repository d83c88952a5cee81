// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Keyward Node
//!
//! Entry point for the `keyward` binary. Parses CLI arguments, loads the
//! custody key and policy, opens the ledger, and serves the proxy API and
//! the metrics endpoint until SIGINT/SIGTERM.
//!
//! Subcommands:
//!
//! - `run`: start the gateway
//! - `check-policy`: dry-run a policy file against one transaction
//! - `version`: print build version information

mod api;
mod auth;
mod cli;
mod logging;
mod metrics;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::signal;

use keyward_gateway::chain::{ChainClient, RpcChainClient};
use keyward_gateway::config::{PolicyLimits, API_PREFIX, LEDGER_DIR};
use keyward_gateway::ledger::SledLedger;
use keyward_gateway::nonce::{ChainNonceSequencer, LocalNonceCounter, NonceSequencer};
use keyward_gateway::policy::{LuaPolicyEngine, PolicyEvaluator, PolicySource};
use keyward_gateway::transaction::{decode_data, parse_address, parse_value, TransactionSigner};
use keyward_gateway::{CandidateTransaction, Gateway};

use auth::BasicAuth;
use cli::{CheckPolicyArgs, Commands, KeywardCli, NonceStrategy, RunArgs};
use metrics::{GatewayMetrics, SharedMetrics};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = KeywardCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await.map(|()| ExitCode::SUCCESS),
        Commands::CheckPolicy(args) => check_policy(args),
        Commands::Version => {
            print_version();
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Starts the gateway: proxy API, metrics endpoint, and policy reload on
/// SIGHUP.
async fn run_node(args: RunArgs) -> Result<()> {
    logging::init_logging(logging::DEFAULT_FILTER, args.log_format)?;

    tracing::info!(
        rpc_url = %args.rpc_url,
        port = args.port,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        nonce_strategy = ?args.nonce_strategy,
        "starting keyward"
    );

    // --- Upstream node ---
    let chain: Arc<dyn ChainClient> =
        Arc::new(RpcChainClient::new(&args.rpc_url).context("invalid --rpc-url")?);
    let chain_id = match args.chain_id {
        Some(id) => id,
        None => {
            let id = chain
                .chain_id()
                .await
                .context("failed to query chain id from node")?;
            tracing::info!(chain_id = id, "chain id discovered");
            id
        }
    };

    // --- Custody key ---
    let signer = load_signer(&args, chain_id)?;
    tracing::info!(address = %signer.address(), chain_id, "custody key loaded");

    // --- Policy ---
    let limits = PolicyLimits::default().with_timeout(Duration::from_millis(args.policy_timeout_ms));
    let engine = LuaPolicyEngine::new(limits);
    let rules = PolicySource::from_file(&args.policy)
        .with_context(|| format!("failed to read policy {}", args.policy.display()))?;
    engine
        .check(&rules.current())
        .with_context(|| format!("policy {} does not load", args.policy.display()))?;
    tracing::info!(path = %args.policy.display(), timeout_ms = args.policy_timeout_ms, "policy loaded");

    // --- Ledger ---
    let ledger_path = args.data_dir.join(LEDGER_DIR);
    std::fs::create_dir_all(&ledger_path).with_context(|| {
        format!("failed to create ledger directory: {}", ledger_path.display())
    })?;
    let ledger = SledLedger::open(&ledger_path)
        .with_context(|| format!("failed to open ledger at {}", ledger_path.display()))?;
    tracing::info!(path = %ledger_path.display(), records = ledger.len(), "ledger opened");

    // --- Nonces ---
    let nonces: Arc<dyn NonceSequencer> = match args.nonce_strategy {
        NonceStrategy::Chain => Arc::new(ChainNonceSequencer::new(chain.clone())),
        NonceStrategy::Local => {
            let counter = LocalNonceCounter::new();
            let next = counter
                .seed_from_chain(chain.as_ref(), signer.address())
                .await
                .context("failed to seed nonce counter from node")?;
            tracing::info!(next, "local nonce counter seeded");
            Arc::new(counter)
        }
    };

    let gateway = Arc::new(Gateway::new(
        chain,
        nonces,
        Arc::new(engine),
        rules,
        Arc::new(ledger),
        signer,
    ));
    let node_metrics = Arc::new(GatewayMetrics::new().context("failed to register metrics")?);

    let auth = match (&args.basic_auth_user, &args.basic_auth_pass) {
        (Some(user), Some(pass)) => Some(BasicAuth::new(user, pass)),
        _ => {
            tracing::warn!("basic auth disabled, proxy routes are open");
            None
        }
    };

    // --- API server ---
    let app_state = api::AppState {
        gateway: Arc::clone(&gateway),
        metrics: Arc::clone(&node_metrics),
    };
    let api_router = api::create_router(app_state, auth);
    let api_addr = format!("0.0.0.0:{}", args.port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {api_addr}"))?;
    tracing::info!(addr = %api_addr, prefix = API_PREFIX, "proxy API listening");

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {metrics_addr}"))?;
    tracing::info!(addr = %metrics_addr, "metrics server listening");

    let reload_loop = tokio::spawn(reload_policy_on_hangup(
        Arc::clone(&gateway),
        Arc::clone(&node_metrics),
    ));

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!(error = %e, "API server error");
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!(error = %e, "metrics server error");
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    reload_loop.abort();
    tracing::info!("keyward stopped");
    Ok(())
}

fn load_signer(args: &RunArgs, chain_id: u64) -> Result<TransactionSigner> {
    match (&args.private_key, &args.keystore) {
        (Some(key), _) => TransactionSigner::from_hex(key, chain_id).context("invalid --private-key"),
        (None, Some(path)) => {
            let passphrase = args.passphrase.as_deref().unwrap_or_default();
            TransactionSigner::from_keystore(path, passphrase, chain_id)
                .with_context(|| format!("failed to decrypt keystore {}", path.display()))
        }
        (None, None) => bail!("either --private-key or --keystore is required"),
    }
}

/// Re-reads the policy file on every SIGHUP. A file that fails to read or
/// load leaves the running policy in place.
#[cfg(unix)]
async fn reload_policy_on_hangup(gateway: Arc<Gateway>, metrics: SharedMetrics) -> Result<()> {
    use tokio::signal::unix::{signal as unix_signal, SignalKind};

    let mut hangup =
        unix_signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;
    while hangup.recv().await.is_some() {
        let target = Arc::clone(&gateway);
        let outcome =
            tokio::task::spawn_blocking(move || target.rules().reload(target.policy())).await;
        match outcome {
            Ok(Ok(())) => {
                tracing::info!(path = ?gateway.rules().path(), "policy reloaded");
                metrics.policy_reloaded(true);
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "policy reload failed, keeping previous policy");
                metrics.policy_reloaded(false);
            }
            Err(e) => {
                tracing::error!(error = %e, "policy reload task failed");
                metrics.policy_reloaded(false);
            }
        }
    }
    Ok(())
}

#[cfg(not(unix))]
async fn reload_policy_on_hangup(_gateway: Arc<Gateway>, _metrics: SharedMetrics) -> Result<()> {
    std::future::pending::<()>().await;
    Ok(())
}

/// Evaluates a policy file against one transaction and prints `allow` or
/// `deny`. A denial exits with status 1.
fn check_policy(args: CheckPolicyArgs) -> Result<ExitCode> {
    let source = std::fs::read_to_string(&args.policy)
        .with_context(|| format!("failed to read policy {}", args.policy.display()))?;

    let to = args.to.as_deref().map(parse_address).transpose()?;
    let candidate = CandidateTransaction {
        to: to.map(|address| address.to_checksum(None)),
        value: parse_value(&args.value)?.to_string(),
        data: decode_data(&args.data)?.to_vec(),
    };

    let limits = PolicyLimits::default().with_timeout(Duration::from_millis(args.policy_timeout_ms));
    let allowed = LuaPolicyEngine::new(limits)
        .evaluate(&source, &candidate)
        .context("policy evaluation failed")?;

    if allowed {
        println!("allow");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("deny");
        Ok(ExitCode::FAILURE)
    }
}

fn print_version() {
    println!("keyward {}", env!("CARGO_PKG_VERSION"));
    println!("rustc   {}", rustc_version());
}

fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
