mod audit;
mod blacklist;
mod config;
mod connection;
mod handler;
mod registry;
mod relay;
mod request;
mod routing;
mod status;
#[cfg(test)]
mod test_support;

use crate::audit::AuditLauncher;
use crate::config::{Cli, ProxyConfig};
use crate::connection::ConnectionTracker;
use crate::handler::ProxyContext;
use crate::registry::HostRegistry;
use clap::Parser;
use color_eyre::eyre::Result;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use std::sync::Arc;
use tokio::net::{TcpListener, TcpSocket};
use tokio::signal;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tls_audit_proxy=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    color_eyre::install()?;

    let args = Cli::parse();

    // Create proxy configuration from CLI arguments
    let config = ProxyConfig::from_cli(args)?;

    let listener = bind_listener(&config)?;

    info!(
        "tls-audit-proxy v{} listening on {}",
        env!("CARGO_PKG_VERSION"),
        config.listen_addr
    );
    info!(
        "Audit tool: {} (reports in {})",
        config.audit.program.display(),
        config.audit.output_dir.display()
    );
    if !config.audit.passthrough.is_empty() {
        info!("Audit tool arguments: {}", config.audit.passthrough.join(" "));
    }
    info!(
        "Audit ports from {} on {}, {} connections expected per audit",
        config.registry.base_port, config.registry.audit_host, config.registry.expected_steps
    );
    if config.blacklist.is_empty() {
        info!("No blacklist loaded; every valid host will be audited");
    } else {
        info!("Blacklist loaded with {} entries", config.blacklist.len());
    }

    let registry = Arc::new(HostRegistry::new(config.blacklist, config.registry));
    let launcher = Arc::new(AuditLauncher::new(config.audit, Arc::clone(&registry)));
    let ctx = Arc::new(ProxyContext {
        registry: Arc::clone(&registry),
        launcher: Arc::clone(&launcher),
        connections: Arc::new(ConnectionTracker::new()),
        warmup: config.warmup,
    });

    tokio::spawn(status::run_status_view(registry.subscribe()));
    if let Some(every) = config.status_interval {
        tokio::spawn(status::run_summary(Arc::clone(&ctx), every));
    }

    // Run until interrupted; open connections are not drained
    tokio::select! {
        _ = handler::serve(listener, ctx) => {}
        _ = shutdown_signal() => info!("Shutdown signal received"),
    }

    launcher.shutdown().await;

    Ok(())
}

/// Resolves on Ctrl+C; never resolves if the handler cannot be installed
async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        warn!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Bind the proxy socket with the configured backlog
fn bind_listener(config: &ProxyConfig) -> std::io::Result<TcpListener> {
    let socket = if config.listen_addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(config.listen_addr)?;
    socket.listen(config.backlog)
}
