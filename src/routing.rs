use std::fmt;

use crate::registry::Host;

/// Where a tunnel's bytes are sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Straight to the requested destination
    Direct { host: String, port: u16 },
    /// To the host's audit listener during its audit window
    Audit { host: String, port: u16 },
}

impl Route {
    pub fn direct(host: impl Into<String>, port: u16) -> Self {
        Route::Direct {
            host: host.into(),
            port,
        }
    }

    /// Address suitable for `TcpStream::connect`
    pub fn addr(&self) -> (&str, u16) {
        match self {
            Route::Direct { host, port } | Route::Audit { host, port } => (host.as_str(), *port),
        }
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self, Route::Audit { .. })
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Direct { host, port } => write!(f, "direct {}:{}", host, port),
            Route::Audit { host, port } => write!(f, "audit {}:{}", host, port),
        }
    }
}

/// Progress gained by each redirected connection, in percent
pub fn progress_step(expected_steps: u32) -> u8 {
    let step = 100 / expected_steps.max(1);
    step.min(100) as u8
}

/// Pick the destination for one accepted tunnel and advance the host's progress.
///
/// Blacklisted, finished, and non-auditable hosts go direct. Anything else is
/// redirected to `audit_host:audit_port` and nudged one step closer to 100.
pub fn choose(host: &mut Host, requested_port: u16, audit_host: &str) -> Route {
    let audit_port = match host.audit_port.filter(|_| host.in_audit_window()) {
        Some(port) => port,
        None => return Route::direct(host.hostname.clone(), requested_port),
    };

    let step = progress_step(host.expected_steps);
    host.progress = host.progress.saturating_add(step).min(100);

    Route::Audit {
        host: audit_host.to_string(),
        port: audit_port,
    }
}
