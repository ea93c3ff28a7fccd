use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use parkbuddy::observability;
use parkbuddy::tenant::TenantManager;
use parkbuddy::wire;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Server settings, read from `PARKBUDDY_*` environment variables.
#[derive(Debug, PartialEq)]
struct Config {
    bind: String,
    port: u16,
    data_dir: PathBuf,
    max_connections: usize,
    metrics_port: Option<u16>,
    seed_default_lots: bool,
}

impl Config {
    fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unset or unparsable values fall back to their defaults.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parse_with<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            lookup(key).and_then(|v| v.trim().parse().ok())
        }
        Self {
            bind: lookup("PARKBUDDY_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_with(&lookup, "PARKBUDDY_PORT").unwrap_or(5433),
            data_dir: lookup("PARKBUDDY_DATA_DIR").map_or_else(|| PathBuf::from("./data"), PathBuf::from),
            max_connections: parse_with(&lookup, "PARKBUDDY_MAX_CONNECTIONS").unwrap_or(256),
            metrics_port: parse_with(&lookup, "PARKBUDDY_METRICS_PORT"),
            seed_default_lots: lookup("PARKBUDDY_SEED_DEFAULT_LOTS").map_or(true, |v| flag(&v)),
        }
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    observability::init(config.metrics_port);
    std::fs::create_dir_all(&config.data_dir)?;

    let tenants = Arc::new(TenantManager::new(config.data_dir.clone(), config.seed_default_lots));
    let semaphore = Arc::new(Semaphore::new(config.max_connections));
    let listener = TcpListener::bind(config.addr()).await?;
    info!(?config, "parkbuddy listening on {}", config.addr());

    serve(listener, tenants, semaphore.clone(), shutdown_signal()).await;
    drain(&semaphore, config.max_connections).await;

    info!("parkbuddy stopped");
    Ok(())
}

/// Accept connections until `shutdown` resolves. Connections over the
/// semaphore's capacity are closed straight away.
async fn serve(
    listener: TcpListener,
    tenants: Arc<TenantManager>,
    semaphore: Arc<Semaphore>,
    shutdown: impl std::future::Future<Output = ()>,
) {
    tokio::pin!(shutdown);
    loop {
        let (socket, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::error!("accept error: {e}");
                    continue;
                }
            },
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                return;
            }
        };

        let Ok(permit) = semaphore.clone().try_acquire_owned() else {
            warn!("connection limit reached, rejecting {peer}");
            metrics::counter!(observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
            continue;
        };

        info!("connection from {peer}");
        metrics::counter!(observability::CONNECTIONS_TOTAL).increment(1);
        metrics::gauge!(observability::CONNECTIONS_ACTIVE).increment(1.0);
        let tenants = tenants.clone();
        tokio::spawn(async move {
            if let Err(e) = wire::process_connection(socket, tenants).await {
                tracing::error!("connection error from {peer}: {e}");
            }
            metrics::gauge!(observability::CONNECTIONS_ACTIVE).decrement(1.0);
            drop(permit);
        });
    }
}

/// Wait for open connections to hand back their permits, up to `DRAIN_TIMEOUT`.
async fn drain(semaphore: &Semaphore, capacity: usize) {
    info!("draining connections...");
    let drained = async {
        while semaphore.available_permits() < capacity {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    };
    match tokio::time::timeout(DRAIN_TIMEOUT, drained).await {
        Ok(()) => info!("all connections drained"),
        Err(_) => {
            let remaining = capacity - semaphore.available_permits();
            warn!("drain timeout, {remaining} connections still open");
        }
    }
}

/// Resolves on ctrl-c or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!("cannot listen for SIGTERM: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
