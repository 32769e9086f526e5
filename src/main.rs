use std::sync::Arc;

use tab_bridge::config::{BridgeConfig, ChannelMode};
use tab_bridge::host::SimulatedHost;
use tab_bridge::identity::{FileLeaseStore, InMemoryLeaseStore, LeaseStore};
use tab_bridge::session::{SessionExit, WorkerSession};

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing; TAB_BRIDGE_LOG_DIR adds a rolling file log.
    let _log_guard = match std::env::var("TAB_BRIDGE_LOG_DIR").ok() {
        Some(dir) => {
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(
                dir,
                "tab-bridge.log",
            ));
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_target(false)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_target(false)
                .init();
            None
        }
    };

    let config = BridgeConfig::from_env()?;

    let workers: usize = std::env::var("TAB_BRIDGE_WORKERS")
        .unwrap_or_else(|_| "1".to_string())
        .parse()
        .unwrap_or(1);

    let lease_file = std::env::var("TAB_BRIDGE_LEASE_FILE").ok();

    eprintln!("🌉 tab-bridge v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Coordinator: {}", config.coordinator_url);
    eprintln!(
        "   Channel: {}",
        match config.channel {
            ChannelMode::Push => "push",
            ChannelMode::Duplex => "duplex",
        }
    );
    eprintln!("   Workers: {}", workers);
    eprintln!(
        "   Lease store: {}\n",
        lease_file.as_deref().unwrap_or("in-memory")
    );

    // Every simulated tab shares the registry, the way real tabs share
    // origin storage.
    let store: Arc<dyn LeaseStore> = match lease_file {
        Some(path) => Arc::new(FileLeaseStore::new(path)),
        None => Arc::new(InMemoryLeaseStore::new()),
    };

    let mut handles = Vec::new();
    for index in 0..workers {
        let config = config.clone();
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let host = Arc::new(SimulatedHost::new().with_auto_trigger());
            let session = WorkerSession::new(config, host, store)?;
            loop {
                match session.run().await? {
                    SessionExit::Reload => {
                        tracing::info!(worker = index, "Session restarting after reload");
                    }
                    SessionExit::Closed => {
                        tracing::info!(worker = index, "Session closed");
                        break;
                    }
                }
            }
            anyhow::Ok(())
        }));
    }

    for handle in handles {
        handle.await??;
    }

    Ok(())
}
