//! otto server daemon
//!
//! Wires the core subsystems together: configuration, the device registry,
//! the rule engine, the user store and the JSON-RPC dispatcher with its
//! transports, plus the clock tick driving time-based rules. A SIGUSR1
//! stands in for the push button on installations without a wired one.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use otto_config::ConfigManager;
use otto_devices::MemoryDeviceRegistry;
use otto_rpc::transports::{tcp, websocket};
use otto_rpc::{Core, RpcServer, ServerHandle};
use otto_rules::{RuleEngine, RuleStore};
use otto_users::{PushButtonManager, UserManager};

fn data_dir() -> PathBuf {
    if let Some(dir) = std::env::args().nth(1) {
        return PathBuf::from(dir);
    }
    if let Ok(dir) = std::env::var("OTTO_DATA_DIR") {
        return PathBuf::from(dir);
    }
    PathBuf::from("/var/lib/otto")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let dir = data_dir();
    info!(data_dir = %dir.display(), version = env!("CARGO_PKG_VERSION"), "Starting otto");
    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("cannot create data directory {}", dir.display()))?;

    let config = ConfigManager::load(&dir)
        .await
        .context("cannot load server settings")?;

    let (registry, mut device_events) = MemoryDeviceRegistry::new();
    let registry = Arc::new(registry);

    let mut engine = RuleEngine::new(
        registry.clone(),
        RuleStore::new(dir.join("rules")),
        config.time_zone(),
    );
    engine.load().await.context("cannot load rules")?;

    let users = UserManager::open(dir.join("users.sqlite"))
        .await
        .context("cannot open user database")?;

    let tcp_endpoints = config.settings().tcp_servers.clone();
    let ws_endpoints = config.settings().web_socket_servers.clone();

    let core = Core {
        engine,
        users,
        push_button: PushButtonManager::new(),
        config,
        registry,
        push_button_available: true,
        cloud_connected: false,
    };
    let (server, handle) = RpcServer::new(core);
    tokio::spawn(server.run());

    for endpoint in tcp_endpoints {
        let handle = handle.clone();
        tokio::spawn(async move {
            if let Err(e) = tcp::serve(endpoint, handle).await {
                warn!(error = %e, "TCP server terminated");
            }
        });
    }
    for endpoint in ws_endpoints {
        let handle = handle.clone();
        tokio::spawn(async move {
            if let Err(e) = websocket::serve(endpoint, handle).await {
                warn!(error = %e, "WebSocket server terminated");
            }
        });
    }

    // device events cross into the core through the dispatcher channel
    {
        let handle = handle.clone();
        tokio::spawn(async move {
            while let Some(event) = device_events.recv().await {
                handle.device_event(event);
            }
        });
    }

    // one tick per second drives calendar windows and time events
    {
        let handle = handle.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                handle.time_tick(Utc::now());
            }
        });
    }

    spawn_push_button_listener(handle.clone());

    tokio::signal::ctrl_c()
        .await
        .context("cannot listen for shutdown signal")?;
    info!("Shutting down");
    Ok(())
}

#[cfg(unix)]
fn spawn_push_button_listener(handle: ServerHandle) {
    tokio::spawn(async move {
        let mut stream = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::user_defined1()) {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGUSR1, push button disabled");
                return;
            }
        };
        while stream.recv().await.is_some() {
            info!("Push button pressed");
            handle.push_button_pressed();
        }
    });
}

#[cfg(not(unix))]
fn spawn_push_button_listener(_handle: ServerHandle) {}
