use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::registry::{Host, HostId, HostRegistry};

/// Address every audit listener binds to
pub const AUDIT_BIND_ADDR: &str = "0.0.0.0";

/// Error type for a single audit tool run
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("failed to create report file {path}: {source}")]
    Report {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to start audit tool: {0}")]
    Spawn(#[source] io::Error),

    #[error("failed waiting for audit tool: {0}")]
    Wait(#[source] io::Error),
}

/// Invocation contract of the external audit tool:
/// `<program> -l 0.0.0.0 -p <port> <passthrough...> --user-cn <hostname>`
#[derive(Debug, Clone)]
pub struct AuditCommand {
    pub program: PathBuf,
    pub passthrough: Vec<String>,
    pub output_dir: PathBuf,
}

impl AuditCommand {
    pub fn new(program: impl Into<PathBuf>, passthrough: Vec<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            passthrough,
            output_dir: output_dir.into(),
        }
    }

    /// Full argument list for one host
    pub fn args(&self, hostname: &str, port: u16) -> Vec<String> {
        let mut args = Vec::with_capacity(self.passthrough.len() + 6);
        args.push("-l".to_string());
        args.push(AUDIT_BIND_ADDR.to_string());
        args.push("-p".to_string());
        args.push(port.to_string());
        args.extend(self.passthrough.iter().cloned());
        args.push("--user-cn".to_string());
        args.push(hostname.to_string());
        args
    }

    /// Where the tool's stdout for `hostname` is written
    pub fn report_path(&self, hostname: &str) -> PathBuf {
        self.output_dir.join(format!("{}.txt", hostname))
    }

    async fn run(&self, hostname: &str, port: u16) -> Result<ExitStatus, AuditError> {
        let path = self.report_path(hostname);
        let report = create_report(&path).await?;

        let mut child = Command::new(&self.program)
            .args(self.args(hostname, port))
            .stdin(Stdio::null())
            .stdout(report)
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(AuditError::Spawn)?;

        child.wait().await.map_err(AuditError::Wait)
    }
}

async fn create_report(path: &Path) -> Result<std::fs::File, AuditError> {
    let file = tokio::fs::File::create(path)
        .await
        .map_err(|source| AuditError::Report {
            path: path.display().to_string(),
            source,
        })?;
    Ok(file.into_std().await)
}

/// Starts one audit tool run per newly seen host and tracks the runs.
///
/// A run ends when the tool process exits, whatever its status; the host is
/// then marked scanned in the registry. Runs are aborted (and their child
/// processes killed) by [`AuditLauncher::shutdown`].
pub struct AuditLauncher {
    command: Arc<AuditCommand>,
    registry: Arc<HostRegistry>,
    tasks: Mutex<JoinSet<HostId>>,
}

impl AuditLauncher {
    pub fn new(command: AuditCommand, registry: Arc<HostRegistry>) -> Self {
        Self {
            command: Arc::new(command),
            registry,
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Start the audit tool for `host` in the background.
    ///
    /// Returns `false` without starting anything when the host is blacklisted,
    /// has an invalid hostname, or has no audit port.
    pub async fn launch(&self, host: &Host) -> bool {
        let port = match host.audit_port {
            Some(port) if host.is_auditable() => port,
            _ => {
                debug!("Audit skipped for {}", host.hostname);
                return false;
            }
        };

        let command = Arc::clone(&self.command);
        let registry = Arc::clone(&self.registry);
        let id = host.id;
        let hostname = host.hostname.clone();

        let mut tasks = self.tasks.lock().await;
        reap_finished(&mut tasks);

        info!("[{}] Starting audit of {} on port {}", id, hostname, port);
        tasks.spawn(async move {
            match command.run(&hostname, port).await {
                Ok(status) => info!("[{}] Audit of {} finished ({})", id, hostname, status),
                Err(e) => warn!("[{}] Audit of {} failed: {}", id, hostname, e),
            }
            registry.mark_scanned(id).await;
            id
        });
        true
    }

    /// Number of audit runs still in progress
    pub async fn running(&self) -> usize {
        let mut tasks = self.tasks.lock().await;
        reap_finished(&mut tasks);
        tasks.len()
    }

    /// Abort every running audit and kill its tool process
    pub async fn shutdown(&self) {
        let mut tasks = self.tasks.lock().await;
        let running = tasks.len();
        tasks.shutdown().await;
        if running > 0 {
            info!("Stopped {} running audit(s)", running);
        }
    }
}

fn reap_finished(tasks: &mut JoinSet<HostId>) {
    while let Some(result) = tasks.try_join_next() {
        if let Err(e) = result {
            if !e.is_cancelled() {
                warn!("Audit task ended abnormally: {}", e);
            }
        }
    }
}
