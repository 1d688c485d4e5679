//! Tracing subscriber set-up

use chrono::{FixedOffset, Utc};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "alertwatch=info,tower_http=info";

/// Log timestamps as wall time in the reference timezone
#[derive(Debug, Clone, Copy)]
pub struct ReferenceTimer {
    tz: FixedOffset,
}

impl ReferenceTimer {
    pub fn new(tz: FixedOffset) -> Self {
        Self { tz }
    }
}

impl FormatTime for ReferenceTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            Utc::now().with_timezone(&self.tz).format("%Y-%m-%d %H:%M:%S%.3f")
        )
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
pub fn init(tz: FixedOffset) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_timer(ReferenceTimer::new(tz)))
        .init();
}
