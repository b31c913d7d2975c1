use clap::Parser;
use common::profiling::CpuProfiler;
use common::ShutdownMessage;
use proxy::backend::Backends;
use proxy::config::ProxyConfig;
use proxy::server::auth::identity::IdentityMap;
use proxy::server::auth::AuthProvider;
use proxy::server::proxy_cli_args::ProxyServerArgs;
use proxy::server::proxy_srv::RwSplitServer;
use proxy::server::ProxyState;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

async fn shutdown_signal() -> ShutdownMessage {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => ShutdownMessage::Drain("SIGINT".to_string()),
        _ = terminate => ShutdownMessage::Drain("SIGTERM".to_string()),
    }
}

fn main() {
    let args = ProxyServerArgs::parse();

    let level = Level::from_str(&args.log_level_or_default()).unwrap_or(Level::INFO);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("INFO"))
        .add_directive(level.into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_line_number(true)
        .init();

    info!("ProxySrv {:?} args={args:?}", ProxyState::Initializing);

    let profiler = args.cpuprofile.as_ref().and_then(|path| {
        CpuProfiler::start(path)
            .map_err(|e| error!("profiler disabled: {e}"))
            .ok()
    });

    let config = match ProxyConfig::load(args.config.as_deref().map(Path::new)) {
        Ok(config) => config,
        Err(e) => {
            error!("couldn't load configuration file: {e}");
            std::process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("RWSPLIT_PROXY")
        .worker_threads(args.workers)
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to build runtime: {e}");
            std::process::exit(1);
        }
    };

    runtime.block_on(async {
        let identities = Arc::new(IdentityMap::from_config(&config));
        let auth = AuthProvider::new(Arc::clone(&identities));
        let backends = match Backends::from_config(&config, &identities) {
            Ok(backends) => Arc::new(backends),
            Err(e) => {
                error!("failed to initialize backend pools: {e}");
                std::process::exit(1);
            }
        };
        backends.warm_up().await;

        let bind_addr = args
            .listen_address
            .clone()
            .unwrap_or_else(|| config.bind_addr());
        let listener = match TcpListener::bind(&bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("failed to listen on {bind_addr}: {e}");
                std::process::exit(1);
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(ShutdownMessage::Init);
        tokio::spawn(async move {
            let msg = shutdown_signal().await;
            info!("ProxySrv received shutdown: {msg:?}");
            let _ = shutdown_tx.send(msg);
        });

        let server = Arc::new(RwSplitServer::new(backends, auth, args.log_queries));
        if let Err(e) = server.serve(listener, shutdown_rx).await {
            error!("ProxySrv serve failed: {e}");
        }
    });

    if let Some(profiler) = profiler {
        if let Err(e) = profiler.report() {
            error!("profiler report failed: {e}");
        }
    }
    info!("ProxySrv exited cleanly");
}
