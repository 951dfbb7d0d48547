// src/observability/mod.rs
//! Logging and metrics
//!
//! - **Tracing**: `tracing-subscriber` with an `EnvFilter` (honours `RUST_LOG`)
//!   and either human-readable or JSON output
//! - **Metrics**: counters emitted through the `metrics` facade; the host
//!   installs whichever recorder it wants

use crate::utils::config::LoggingConfig;
use crate::utils::errors::{AgentError, Result};
use metrics::{describe_counter, Unit};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Envelopes handed to an open connection
pub const ENVELOPES_SENT: &str = "squeaky_envelopes_sent_total";

/// Envelopes dropped because the connection was not open
pub const ENVELOPES_DROPPED: &str = "squeaky_envelopes_dropped_total";

/// Cosmetic mutations coalesced away by the throttle
pub const MUTATIONS_COALESCED: &str = "squeaky_mutations_coalesced_total";

/// Reconnect attempts made by the transport channel
pub const RECONNECT_ATTEMPTS: &str = "squeaky_reconnect_attempts_total";

/// Sessions ended by the inactivity cutoff
pub const SESSIONS_TERMINATED: &str = "squeaky_sessions_terminated_total";

/// Initialize the global tracing subscriber
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| AgentError::ConfigError(format!("Invalid log filter: {}", e)))?;

    let registry = tracing_subscriber::registry().with(filter);

    let result = if config.json {
        registry.with(fmt::layer().json().with_target(true)).try_init()
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()
    };

    result.map_err(|e| AgentError::ConfigError(format!("Tracing already initialized: {}", e)))
}

/// Register metric descriptions with whatever recorder is installed
pub fn init_metrics() {
    describe_counter!(
        ENVELOPES_SENT,
        Unit::Count,
        "Envelopes written to the collector connection"
    );
    describe_counter!(
        ENVELOPES_DROPPED,
        Unit::Count,
        "Envelopes dropped while the connection was not open"
    );
    describe_counter!(
        MUTATIONS_COALESCED,
        Unit::Count,
        "Style-only mutations replaced by a newer one inside the throttle window"
    );
    describe_counter!(
        RECONNECT_ATTEMPTS,
        Unit::Count,
        "Collector reconnect attempts"
    );
    describe_counter!(
        SESSIONS_TERMINATED,
        Unit::Count,
        "Sessions terminated after inactivity"
    );
}
