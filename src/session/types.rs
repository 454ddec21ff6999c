use crate::chart::timeline::ChartFeed;
use crate::error::ConnectionError;
use crate::telemetry::metrics::DerivedMetrics;

/// Feed published to the display and chart collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Notifications are flowing
    Ready,
    Metrics(DerivedMetrics),
    /// Every live metric is back at its zero baseline
    MetricsReset,
    /// Mean of channel 4 over the whole session
    CumulativeOutput(f64),
    ElapsedHours(f64),
    Chart(ChartFeed),
    /// One-time message for the user
    Notice(String),
    /// Last event of a session. `None` when torn down on request.
    Ended(Option<ConnectionError>),
}
