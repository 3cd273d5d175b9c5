pub mod error;
pub mod metrics;
pub mod registry;
pub mod trend;

pub use error::{Error, Result};
pub use metrics::{MetricHandle, MetricKind, MetricSeriesSummary, MetricValue, TrendSummary};
pub use registry::{MetricId, Registry};
pub use trend::quantile;
