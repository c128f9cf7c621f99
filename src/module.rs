//! Extension modules started alongside the broker duties.

use crate::broker::StatusHandle;
use crate::error::{Error, Result};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

/// What a module receives when it starts
pub struct ModuleContext {
    runtime: Handle,
    status: StatusHandle,
}

impl ModuleContext {
    pub fn new(runtime: Handle, status: StatusHandle) -> Self {
        Self { runtime, status }
    }

    /// Runtime the broker duties are scheduled on
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// View of the broker this module is attached to
    pub fn status(&self) -> &StatusHandle {
        &self.status
    }
}

/// A pluggable extension.
///
/// `start` must not block: long-running work belongs in a task spawned on
/// [`ModuleContext::runtime`]. A failed start is logged and the broker keeps
/// running.
pub trait ExtensionModule: Send + Sync {
    fn name(&self) -> &str;

    fn start(&self, context: &ModuleContext) -> Result<()>;

    fn init_message(&self) -> String {
        format!("{} created", self.name())
    }
}

/// Periodically logs a broker status snapshot
pub struct StatusReporter {
    interval: Duration,
}

impl StatusReporter {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl ExtensionModule for StatusReporter {
    fn name(&self) -> &str {
        "StatusReporter"
    }

    fn start(&self, context: &ModuleContext) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::Module {
                name: self.name().to_string(),
                reason: "status interval must be non-zero".to_string(),
            });
        }
        let status = context.status().clone();
        let interval = self.interval;
        context.runtime().spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let stats = status.snapshot();
                info!(
                    health = %stats.health,
                    records_in_memory = stats.records_in_memory,
                    records_persisted = stats.records_persisted,
                    queue_depth = stats.queue_depth,
                    uptime_secs = stats.uptime.as_secs(),
                    "Broker status"
                );
            }
        });
        Ok(())
    }

    fn init_message(&self) -> String {
        format!("Reporting broker status every {}s", self.interval.as_secs())
    }
}
