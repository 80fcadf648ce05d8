//! skewserver: a STOMP 1.2 compatible message queueing server
//!
//! Features:
//! - Incremental STOMP frame parsing, independent of how reads are split
//! - One task per connection, bounded by a connection limit
//! - Optional read timeout for silent peers
//! - Configuration via CLI arguments or TOML file

use skewserver::config::Config;
use skewserver::server::Server;
use std::fmt;
use tracing::info;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::EnvFilter;

const BANNER: &str = "\
███████╗██╗  ██╗███████╗██╗    ██╗███████╗███████╗██████╗ ██╗   ██╗███████╗██████╗\n\
██╔════╝██║ ██╔╝██╔════╝██║    ██║██╔════╝██╔════╝██╔══██╗██║   ██║██╔════╝██╔══██╗\n\
███████╗█████╔╝ █████╗  ██║ █╗ ██║███████╗█████╗  ██████╔╝██║   ██║█████╗  ██████╔╝\n\
╚════██║██╔═██╗ ██╔══╝  ██║███╗██║╚════██║██╔══╝  ██╔══██╗╚██╗ ██╔╝██╔══╝  ██╔══██╗\n\
███████║██║  ██╗███████╗╚███╔███╔╝███████║███████╗██║  ██║ ╚████╔╝ ███████╗██║  ██║\n\
╚══════╝╚═╝  ╚═╝╚══════╝ ╚══╝╚══╝ ╚══════╝╚══════╝╚═╝  ╚═╝  ╚═══╝  ╚══════╝╚═╝  ╚═╝";

const STRAPLINE: &str = "STOMP 1.2 Compatible message queueing server";

/// Log timestamps as local wall-clock time
struct LocalTime;

impl FormatTime for LocalTime {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"))
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(LocalTime)
        .init();

    println!("{}\n{}\n", BANNER, STRAPLINE);

    info!(
        listen = %config.listen,
        max_connections = config.max_connections,
        read_timeout = config.read_timeout,
        workers = ?config.workers,
        "Starting skewserver"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = builder.enable_all().build()?;

    runtime.block_on(async {
        let server = Server::new(config);
        server.run().await
    })
}
