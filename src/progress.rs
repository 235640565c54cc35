use crossbeam_channel::Sender;
use serde::Serialize;

/// Pipeline stages reporting `(completed, total)` progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Producer,
    Parser,
    Consumer,
    Postprocess,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Producer => "producer",
            Stage::Parser => "parser",
            Stage::Consumer => "consumer",
            Stage::Postprocess => "postprocess",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressEvent {
    Stage {
        stage: Stage,
        completed: u64,
        total: u64,
    },
    Status {
        message: String,
    },
    Finished {
        success: bool,
    },
}

pub trait ProgressSink: Send + Sync {
    fn event(&self, event: ProgressEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Stage {
                stage,
                completed,
                total,
            } => tracing::info!(stage = stage.as_str(), completed, total, "progress"),
            ProgressEvent::Status { message } => tracing::info!("{message}"),
            ProgressEvent::Finished { success: true } => tracing::info!("finished"),
            ProgressEvent::Finished { success: false } => tracing::warn!("finished with errors"),
        }
    }
}

/// Drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentProgress;

impl ProgressSink for SilentProgress {
    fn event(&self, _event: ProgressEvent) {}
}

/// Hands events to another thread, e.g. a display loop.
impl ProgressSink for Sender<ProgressEvent> {
    fn event(&self, event: ProgressEvent) {
        let _ = self.send(event);
    }
}
