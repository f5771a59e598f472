use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use filedrop::config::Config;
use filedrop::logging::init_logging;
use filedrop::{AppState, app};

#[derive(Parser, Debug)]
#[command(name = "filedrop")]
#[command(about = "Simple HTTP file server: list, download (directories as zip) and upload files")]
#[command(version)]
struct Cli {
    /// Address to bind to, excluding the port number [default: localhost]
    #[arg(short, long, env = "FILEDROP_ADDR")]
    addr: Option<String>,

    /// Port to listen on [default: 9092]
    #[arg(short, long, env = "FILEDROP_PORT")]
    port: Option<u16>,

    /// Root dir for storing files; request paths are relative to it
    #[arg(short, long, alias = "rootDir", env = "FILEDROP_ROOT")]
    root_dir: Option<PathBuf>,

    /// Log level: TRACE, DEBUG, INFO, WARN or ERROR [default: DEBUG]
    #[arg(long, env = "FILEDROP_LEVEL")]
    level: Option<String>,

    /// File to write log output to, as well as stdout
    #[arg(long, alias = "logFile", env = "FILEDROP_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Do not cache returned data for future requests
    #[arg(long, alias = "noCache", env = "FILEDROP_NO_CACHE")]
    no_cache: bool,

    /// Do not return directories as zip data (also rejects zip uploads)
    #[arg(long, alias = "noDirs", env = "FILEDROP_NO_DIRS")]
    no_dirs: bool,

    /// Config file path (optional)
    #[arg(short, long, env = "FILEDROP_CONFIG")]
    config: Option<PathBuf>,
}

impl Cli {
    /// Layer command line values over the file (or default) config.
    fn apply(self, mut config: Config) -> Config {
        if let Some(addr) = self.addr {
            config.addr = addr;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(root_dir) = self.root_dir {
            config.root_dir = Some(root_dir);
        }
        if let Some(level) = self.level {
            config.log_level = level;
        }
        if let Some(log_file) = self.log_file {
            config.log_file = Some(log_file);
        }
        config.no_cache |= self.no_cache;
        config.no_dirs |= self.no_dirs;
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load config from file if provided, otherwise use defaults
    let base = if let Some(config_path) = &cli.config {
        Config::from_file(config_path)?
    } else {
        Config::default()
    };
    let config = cli.apply(base);

    let _log_guard = init_logging(&config.log_level, config.log_file.as_deref())?;

    let root_dir = config.prepare_root_dir()?;
    info!(root = %root_dir.display(), "Serving files");
    info!(
        cache = config.cache_enabled(),
        directories = config.dirs_enabled(),
        "Content options"
    );

    let addr = config.bind_addr();
    let state = AppState::new(root_dir, config);
    let app = app(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Starting filedrop on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
