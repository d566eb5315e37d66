//! `fleetctl` CLI entry point.
//!
//! Three subcommands, each a distinct process role: `serve` runs the
//! supervisor (Control Plane + Lifecycle Coordinator + Inactivity Sweeper +
//! History Persister), `agent-worker` and `integration-worker` are the
//! argv shape every spawned child process runs under.

use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use fleetctl::api::state::ApiState;
use fleetctl::bus::Bus;
use fleetctl::config::Config;
use fleetctl::history;
use fleetctl::lifecycle::agent::AgentManager;
use fleetctl::lifecycle::coordinator::LifecycleCoordinator;
use fleetctl::messaging::ChannelAdapter;
use fleetctl::messaging::telegram::{TelegramAdapter, TelegramSettings};
use fleetctl::runtime::ChildRuntime;
use fleetctl::runtime::engine::EchoEngine;
use fleetctl::status::StatusStore;
use fleetctl::store::AgentConfigRepo;
use fleetctl::sweeper::InactivitySweeper;

#[derive(Parser)]
#[command(name = "fleetctl", version)]
#[command(about = "Multi-tenant agent orchestration supervisor")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run the supervisor: Control Plane, Lifecycle Coordinator, Inactivity
    /// Sweeper, and History Persister, all in the foreground.
    Serve,
    /// Run one agent's reasoning loop. Spawned by the Agent Manager, never
    /// invoked directly in normal operation.
    AgentWorker {
        #[arg(long)]
        agent_id: String,
        #[arg(long)]
        agent_settings: Option<String>,
    },
    /// Run one channel adapter. Spawned by the Integration Manager, never
    /// invoked directly in normal operation.
    IntegrationWorker {
        #[arg(long)]
        agent_id: String,
        #[arg(long)]
        integration_type: String,
        #[arg(long)]
        integration_settings: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let config = Config::load()?;
        let _otel_provider = fleetctl::telemetry::init_foreground(cli.debug, &config.telemetry);

        match cli.command {
            Command::Serve => run_serve(config).await,
            Command::AgentWorker { agent_id, agent_settings } => {
                run_agent_worker(config, agent_id, agent_settings).await
            }
            Command::IntegrationWorker {
                agent_id,
                integration_type,
                integration_settings,
            } => run_integration_worker(config, agent_id, integration_type, integration_settings).await,
        }
    })
}

async fn run_serve(config: Config) -> anyhow::Result<()> {
    let bus = Bus::connect(&config.redis.url).await?;
    let repo = AgentConfigRepo::connect(&config.database.url).await?;
    history::initialize_schema(repo.pool()).await?;

    let status = Arc::new(StatusStore::new(bus.clone()));
    let coordinator = Arc::new(LifecycleCoordinator::new(Arc::clone(&status)));
    let agent_manager = Arc::new(AgentManager::new(Arc::clone(&status)));

    let sweeper = Arc::new(InactivitySweeper::new(
        Arc::clone(&status),
        Arc::clone(&agent_manager),
        config.sweeper.inactivity_timeout,
        config.sweeper.check_interval,
    ));
    let sweeper_handle = sweeper.spawn();

    let history_stop = Arc::new(AtomicBool::new(false));
    let history_handle = tokio::spawn(history::run_supervisor(
        config.redis.url.clone(),
        repo.pool().clone(),
        config.redis.history_queue_name.clone(),
        Arc::clone(&history_stop),
    ));

    let state = Arc::new(ApiState::new(repo, Arc::clone(&status), coordinator, bus));
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let bind: std::net::SocketAddr = config.control_plane.bind_addr().parse()?;
    let (server_handle, _local_addr) =
        fleetctl::api::server::start_http_server(bind, state, shutdown_rx).await?;

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, stopping supervisor");

    let _ = shutdown_tx.send(true);
    history_stop.store(true, Ordering::Release);
    sweeper_handle.abort();
    history_handle.abort();
    let _ = server_handle.await;

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(s) => s,
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = tokio::signal::ctrl_c() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

async fn run_agent_worker(
    config: Config,
    agent_id: String,
    _agent_settings: Option<String>,
) -> anyhow::Result<()> {
    let bus = Bus::connect(&config.redis.url).await?;
    let base_url = config.control_plane.internal_base_url();

    // The reasoning engine proper is out of scope; every agent worker runs
    // the deterministic echo engine so the rest of the pipeline (input
    // listener, history enqueue, output publish) is exercised end to end.
    let runtime = ChildRuntime::new(agent_id, bus, base_url, |_config| Arc::new(EchoEngine));
    runtime.run().await?;
    Ok(())
}

async fn run_integration_worker(
    config: Config,
    agent_id: String,
    integration_type: String,
    integration_settings: Option<String>,
) -> anyhow::Result<()> {
    let bus = Bus::connect(&config.redis.url).await?;

    loop {
        let restart = match integration_type.as_str() {
            "telegram" => {
                let settings_json = integration_settings
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("telegram integration requires --integration-settings"))?;
                let settings = TelegramSettings::try_from(settings_json)?;
                let adapter = TelegramAdapter::new(&settings, bus.clone());
                adapter.run(&agent_id).await?
            }
            other => {
                anyhow::bail!(
                    "no concrete channel adapter is wired up for integration type '{other}' in this build"
                );
            }
        };

        if !restart {
            break;
        }
    }

    Ok(())
}
