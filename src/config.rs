use clap::{value_parser, Parser};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::audit::AuditCommand;
use crate::blacklist::Blacklist;
use crate::registry::RegistrySettings;

/// Error type for startup configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read blacklist {path}: {source}")]
    Blacklist {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Command line interface configuration
#[derive(Parser, Debug)]
#[command(
    author, version,
    about = "HTTP/HTTPS proxy that routes first-seen TLS hosts through an audit tool",
    long_about = "tls-audit-proxy forwards CONNECT tunnels and absolute-URI HTTP requests.\n\nThe first tunnel to a new host starts the audit tool (qsslcaudit by default) on a\ndedicated port and redirects that host's tunnels to it until the tool exits.\nAfter that, tunnels go straight to the real destination.\n\nArguments the proxy does not recognise are passed verbatim to every audit tool\nrun, e.g.:  tls-audit-proxy --blacklist os-hosts.txt --tls-only\n"
)]
pub struct Cli {
    /// Blacklist file holding host substrings to exclude from auditing,
    /// for example known endpoints used by the OS
    #[arg(long, value_name = "FILE")]
    pub blacklist: Option<PathBuf>,

    /// Port for the proxy to listen on
    #[arg(short, long, default_value_t = 8888)]
    pub port: u16,

    /// IP address to bind the proxy to
    #[arg(long, default_value = "0.0.0.0")]
    pub listen_ip: IpAddr,

    /// Listen backlog of the proxy socket
    #[arg(long, default_value_t = 200)]
    pub backlog: u32,

    /// Audit tool executable
    #[arg(long, default_value = "qsslcaudit", value_name = "PATH")]
    pub tool: PathBuf,

    /// First audit port; host N gets base-port + N
    #[arg(long, default_value_t = 8443)]
    pub base_port: u16,

    /// Host that redirected tunnels connect to
    #[arg(long, default_value = "localhost")]
    pub audit_host: String,

    /// Redirected connections expected per audit (sets the progress step)
    #[arg(long, default_value_t = 22, value_parser = value_parser!(u32).range(1..))]
    pub expected_steps: u32,

    /// Milliseconds to wait after starting an audit before routing
    #[arg(long, default_value_t = 2000)]
    pub warmup_ms: u64,

    /// Directory for the per-host `<hostname>.txt` audit reports
    #[arg(long, default_value = ".", value_name = "DIR")]
    pub output_dir: PathBuf,

    /// Seconds between status summaries (0 disables them)
    #[arg(long, default_value_t = 300)]
    pub status_interval: u64,

    /// Extra arguments passed verbatim to every audit tool run
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "TOOL_ARGS")]
    pub tool_args: Vec<String>,
}

/// Proxy configuration derived from CLI arguments
#[derive(Clone, Debug)]
pub struct ProxyConfig {
    pub listen_addr: SocketAddr,
    pub backlog: u32,
    pub blacklist: Blacklist,
    pub registry: RegistrySettings,
    pub audit: AuditCommand,
    pub warmup: Duration,
    pub status_interval: Option<Duration>,
}

impl ProxyConfig {
    /// Create ProxyConfig from CLI arguments, loading the blacklist file
    pub fn from_cli(args: Cli) -> Result<Self, ConfigError> {
        let blacklist = match &args.blacklist {
            Some(path) => Blacklist::load(path)?,
            None => Blacklist::empty(),
        };

        if args.audit_host.trim().is_empty() {
            return Err(ConfigError::Invalid("--audit-host cannot be empty".to_string()));
        }
        if args.backlog == 0 {
            return Err(ConfigError::Invalid("--backlog must be at least 1".to_string()));
        }

        let status_interval = match args.status_interval {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(Self {
            listen_addr: SocketAddr::new(args.listen_ip, args.port),
            backlog: args.backlog,
            blacklist,
            registry: RegistrySettings {
                base_port: args.base_port,
                expected_steps: args.expected_steps,
                audit_host: args.audit_host,
            },
            audit: AuditCommand::new(args.tool, args.tool_args, args.output_dir),
            warmup: Duration::from_millis(args.warmup_ms),
            status_interval,
        })
    }
}
