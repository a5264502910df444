//! Data models shared by collection and export.
//!
//! - `MetricRecord`: one normalized measurement of a tracked entity
//! - `Alert`: something worth emailing (open issue, failed collection)
//! - `SinkResult`: outcome of one dispatch attempt
//! - `SourceKind`, `OutputKind`: what a run collects and where it exports

pub mod metric;
pub mod sink;

pub use metric::{Alert, AlertKind, MetricRecord, MetricValue, SourceKind, Unit};
pub use sink::{OutputKind, SinkOutcome, SinkResult};
