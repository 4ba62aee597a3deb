use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Receives operator-facing alerts.
pub trait Notifier: Send + Sync {
    fn notify(&self, severity: Severity, message: &str);
}

/// Writes alerts into the log, which doubles as the persistent operator record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Info => info!(notification = true, "{message}"),
            Severity::Warning => warn!(notification = true, "{message}"),
            Severity::Error => error!(notification = true, "{message}"),
        }
    }
}
