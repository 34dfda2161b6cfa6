use std::path::PathBuf;
use std::sync::mpsc;

use chrono::{DateTime, Local};

#[derive(Debug, Clone)]
pub enum RunEvent {
    JobScheduled {
        job: String,
        cron: String,
        next: Option<DateTime<Local>>,
    },
    RunStarted {
        job: String,
    },
    RunLog {
        job: String,
        line: String,
    },
    RunFinished {
        job: String,
        ok: bool,
        error: Option<String>,
        elapsed_ms: u128,
        stored: Option<PathBuf>,
    },
    // A tick fired while the previous run of the same job was still going.
    TickSkipped {
        job: String,
    },
}

impl RunEvent {
    pub fn job(&self) -> &str {
        match self {
            RunEvent::JobScheduled { job, .. }
            | RunEvent::RunStarted { job }
            | RunEvent::RunLog { job, .. }
            | RunEvent::RunFinished { job, .. }
            | RunEvent::TickSkipped { job } => job,
        }
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, ev: RunEvent);
}

/// Turns run events into structured log records.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, ev: RunEvent) {
        match ev {
            RunEvent::JobScheduled { job, cron, next } => match next {
                Some(next) => {
                    tracing::info!(job = %job, cron = %cron, next = %next.to_rfc3339(), "job scheduled")
                }
                None => tracing::warn!(job = %job, cron = %cron, "job has no upcoming run"),
            },
            RunEvent::RunStarted { job } => tracing::info!(job = %job, "backup started"),
            RunEvent::RunLog { job, line } => tracing::info!(job = %job, "{line}"),
            RunEvent::RunFinished {
                job,
                ok,
                error,
                elapsed_ms,
                stored,
            } => {
                if ok {
                    let stored = stored
                        .map(|p| p.display().to_string())
                        .unwrap_or_default();
                    tracing::info!(job = %job, elapsed_ms = elapsed_ms as u64, stored = %stored, "backup finished");
                } else {
                    tracing::error!(
                        job = %job,
                        elapsed_ms = elapsed_ms as u64,
                        error = %error.unwrap_or_default(),
                        "backup failed"
                    );
                }
            }
            RunEvent::TickSkipped { job } => {
                tracing::warn!(job = %job, "previous run still in progress; tick skipped")
            }
        }
    }
}

#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<RunEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<RunEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, ev: RunEvent) {
        let _ = self.tx.send(ev);
    }
}

/// Forwards every event to each inner sink in order.
pub struct FanoutSink {
    sinks: Vec<std::sync::Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<std::sync::Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, ev: RunEvent) {
        for sink in &self.sinks {
            sink.emit(ev.clone());
        }
    }
}
