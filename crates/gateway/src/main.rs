use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use i3_domain::config::Config;
use i3_gateway::api::{self, ApiContext};
use i3_gateway::bootstrap;
use i3_gateway::cli::{self, Cli, Command, ConfigCommand};
use i3_gateway::dispatch::Dispatcher;
use i3_gateway::link::RouterLink;
use i3_gateway::services::Services;
use i3_gateway::shutdown;
use i3_gateway::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, _config_path) = cli::load_config(&cli.config)?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = cli::load_config(&cli.config)?;
            if !cli::config::validate(&config, &config_path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = cli::load_config(&cli.config)?;
            cli::config::show(&config);
            Ok(())
        }
        Some(Command::Keygen {
            mud_name,
            permission,
        }) => {
            cli::keygen::run(&mud_name, &permission);
            Ok(())
        }
        Some(Command::Version) => {
            println!("i3-gateway {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured JSON tracing for the `serve` command.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,i3_gateway=debug")),
        )
        .json()
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!(
        mud_name = %config.mud.name,
        router = %config.router.primary,
        "i3-gateway starting"
    );

    let state = bootstrap::build_app_state(config.clone())?;
    let services = Arc::new(Services::new(state.clone()));
    let ctx = ApiContext {
        state: state.clone(),
        services: services.clone(),
    };

    // ── Packet dispatcher (single consumer of the link reader) ───────
    let (inbound_tx, inbound_rx) = mpsc::channel(256);
    tokio::spawn(Dispatcher::new(state.clone(), services.clone()).run(inbound_rx));

    // ── Router link ──────────────────────────────────────────────────
    let link = RouterLink {
        config: config.clone(),
        status: state.link.clone(),
        outbound: state.outbound.clone(),
        state_file: state.state_file.clone(),
        bus: state.bus.clone(),
        metrics: state.metrics.clone(),
        breaker: state.breaker.clone(),
        inbound_tx,
    };
    let link_handle = tokio::spawn(link.run());

    bootstrap::spawn_background_tasks(&state);

    // ── WebSocket + health HTTP ──────────────────────────────────────
    let http_addr = format!("{}:{}", config.api.host, config.api.ws_port);
    let http_listener = tokio::net::TcpListener::bind(&http_addr)
        .await
        .with_context(|| format!("binding WebSocket listener on {http_addr}"))?;
    tracing::info!(addr = %http_addr, "WebSocket + health endpoints listening");
    let app = api::health::http_app(ctx.clone());
    let http_shutdown = state.shutdown.clone();
    let http_handle = tokio::spawn(async move {
        let service = app.into_make_service_with_connect_info::<SocketAddr>();
        if let Err(e) = axum::serve(http_listener, service)
            .with_graceful_shutdown(async move { http_shutdown.notified().await })
            .await
        {
            tracing::error!(error = %e, "http server failed");
        }
    });

    // ── Line-delimited TCP ───────────────────────────────────────────
    let tcp_addr = format!("{}:{}", config.api.host, config.api.tcp_port);
    let tcp_listener = tokio::net::TcpListener::bind(&tcp_addr)
        .await
        .with_context(|| format!("binding TCP listener on {tcp_addr}"))?;
    tracing::info!(addr = %tcp_addr, "TCP API listening");
    let tcp_handle = tokio::spawn(api::tcp::serve(ctx.clone(), tcp_listener));

    // ── Run until a shutdown signal ──────────────────────────────────
    wait_for_signal(&state).await;
    // Wake acceptors and every connection task.
    state.shutdown.notify_waiters();

    let force = Duration::from_secs(config.shutdown.force_timeout_secs);
    if tokio::time::timeout(force, shutdown::run(state.clone()))
        .await
        .is_err()
    {
        tracing::error!(
            force_secs = force.as_secs(),
            "force timeout reached, aborting remaining tasks"
        );
    }
    http_handle.abort();
    tcp_handle.abort();
    link_handle.abort();
    Ok(())
}

async fn wait_for_signal(state: &AppState) {
    #[cfg(unix)]
    {
        let mut term =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("installing SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("SIGINT received"),
            _ = term.recv() => tracing::info!("SIGTERM received"),
            _ = state.shutdown.notified() => tracing::info!("shutdown requested via API"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("SIGINT received"),
            _ = state.shutdown.notified() => tracing::info!("shutdown requested via API"),
        }
    }
}
