//! Pipeline metrics
//!
//! Counters and histograms live in a process-wide prometheus registry. Nothing
//! is exported over the network; callers may gather the registry themselves.

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::time::Instant;

/// Global metrics registry
pub struct Metrics {
    registry: Registry,

    // Quotes
    pub quote_batches: IntCounterVec,
    pub routes_selected: IntCounterVec,

    // Authorization
    pub permission_denials: IntCounter,

    // Submission outcomes
    pub submissions_confirmed: IntCounter,
    pub submissions_expired: IntCounter,
    pub submissions_failed: IntCounter,

    // Histograms
    pub race_duration: Histogram,
    pub assembly_latency: Histogram,
    pub confirmation_latency: Histogram,
}

impl Metrics {
    /// Create new metrics instance
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let quote_batches = IntCounterVec::new(
            Opts::new("quote_batches_total", "Quote batches received per provider"),
            &["provider"],
        )?;

        let routes_selected = IntCounterVec::new(
            Opts::new("routes_selected_total", "Winning routes per provider"),
            &["provider"],
        )?;

        let permission_denials = IntCounter::with_opts(Opts::new(
            "permission_denials_total",
            "Wraps refused by the permission oracle",
        ))?;

        let submissions_confirmed = IntCounter::with_opts(Opts::new(
            "submissions_confirmed_total",
            "Transactions confirmed",
        ))?;

        let submissions_expired = IntCounter::with_opts(Opts::new(
            "submissions_expired_total",
            "Transactions whose blockhash expired before confirmation",
        ))?;

        let submissions_failed = IntCounter::with_opts(Opts::new(
            "submissions_failed_total",
            "Transactions executed with an on-chain error",
        ))?;

        let race_duration = Histogram::with_opts(
            HistogramOpts::new("quote_race_seconds", "Quote race duration")
                .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0]),
        )?;

        let assembly_latency = Histogram::with_opts(
            HistogramOpts::new("assembly_latency_seconds", "Transaction assembly latency")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        )?;

        let confirmation_latency = Histogram::with_opts(
            HistogramOpts::new("confirmation_latency_seconds", "Send to terminal state")
                .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]),
        )?;

        registry.register(Box::new(quote_batches.clone()))?;
        registry.register(Box::new(routes_selected.clone()))?;
        registry.register(Box::new(permission_denials.clone()))?;
        registry.register(Box::new(submissions_confirmed.clone()))?;
        registry.register(Box::new(submissions_expired.clone()))?;
        registry.register(Box::new(submissions_failed.clone()))?;
        registry.register(Box::new(race_duration.clone()))?;
        registry.register(Box::new(assembly_latency.clone()))?;
        registry.register(Box::new(confirmation_latency.clone()))?;

        Ok(Self {
            registry,
            quote_batches,
            routes_selected,
            permission_denials,
            submissions_confirmed,
            submissions_expired,
            submissions_failed,
            race_duration,
            assembly_latency,
            confirmation_latency,
        })
    }

    /// Get the registry for gathering
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Global metrics instance
pub fn metrics() -> &'static Metrics {
    static METRICS: once_cell::sync::Lazy<Metrics> =
        once_cell::sync::Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
    &METRICS
}

/// Timer helper for measuring operation duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn observe_duration(&self, histogram: &Histogram) {
        histogram.observe(self.start.elapsed().as_secs_f64());
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}
