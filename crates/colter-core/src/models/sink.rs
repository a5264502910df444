use std::fmt;

use crate::error::SinkDispatchError;

/// Time-series sinks selectable with `--output`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputKind {
    Influx,
    Prometheus,
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputKind::Influx => write!(f, "influx"),
            OutputKind::Prometheus => write!(f, "prometheus"),
        }
    }
}

#[derive(Debug)]
pub enum SinkOutcome {
    /// Number of records or messages delivered
    Delivered(usize),
    Failed(SinkDispatchError),
}

/// Result of dispatching one batch to one sink
#[derive(Debug)]
pub struct SinkResult {
    pub sink: String,
    pub outcome: SinkOutcome,
}

impl SinkResult {
    pub fn delivered(sink: impl Into<String>, count: usize) -> Self {
        Self {
            sink: sink.into(),
            outcome: SinkOutcome::Delivered(count),
        }
    }

    pub fn failed(sink: impl Into<String>, error: SinkDispatchError) -> Self {
        Self {
            sink: sink.into(),
            outcome: SinkOutcome::Failed(error),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, SinkOutcome::Delivered(_))
    }

    pub fn error(&self) -> Option<&SinkDispatchError> {
        match &self.outcome {
            SinkOutcome::Failed(e) => Some(e),
            SinkOutcome::Delivered(_) => None,
        }
    }
}
