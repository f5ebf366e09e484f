//! Quote aggregator
//!
//! Races every configured provider for one request and keeps the route with the
//! strictly largest output amount. The stop rule is a policy value: wait for a
//! minimum number of batches per provider, or for every provider to finish.
//! A decision window bounds the total wait either way.

use std::time::{Duration, Instant};

use futures::stream::{self, BoxStream, StreamExt};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::metrics::metrics;
use crate::providers::{ProviderError, QuoteProvider, QuoteRoute};
use crate::streaming::RouteStream;
use crate::types::QuoteRequest;

/// When a provider counts as done for the purpose of stopping the race
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchTarget {
    /// Satisfied after this many batches (or when the provider finishes first)
    MinBatches(usize),
    /// Satisfied only when the provider finishes
    UntilClosed,
}

impl Default for BatchTarget {
    fn default() -> Self {
        BatchTarget::MinBatches(1)
    }
}

/// Race configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RacePolicy {
    pub batch_target: BatchTarget,
    /// Slippage sent to every provider
    pub slippage_bps: u16,
    /// Random slippage an adapter may add on top
    pub slippage_jitter_bps: u16,
    /// Upper bound on total race time
    pub decision_window: Option<Duration>,
}

impl Default for RacePolicy {
    fn default() -> Self {
        Self {
            batch_target: BatchTarget::default(),
            slippage_bps: 50,
            slippage_jitter_bps: 10,
            decision_window: None,
        }
    }
}

#[derive(Error, Debug)]
pub enum AggregatorError {
    #[error("No quote available from {providers} provider(s)")]
    NoQuoteAvailable {
        providers: usize,
        /// Last error per provider, for diagnostics
        errors: Vec<(String, ProviderError)>,
    },

    #[error("No providers configured")]
    NoProviders,
}

impl AggregatorError {
    pub fn is_retryable(&self) -> bool {
        match self {
            AggregatorError::NoQuoteAvailable { errors, .. } => {
                errors.is_empty() || errors.iter().any(|(_, e)| e.is_retryable())
            }
            AggregatorError::NoProviders => false,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            AggregatorError::NoQuoteAvailable { .. } => "no_quote",
            AggregatorError::NoProviders => "configuration",
        }
    }
}

/// Running best-route selection
///
/// Replaces the current best only on a strictly larger `out_amount`, so equal
/// offers keep whichever was seen first.
#[derive(Debug, Default)]
pub struct RouteSelector {
    best: Option<QuoteRoute>,
    offered: usize,
}

impl RouteSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a route; returns true if it became the new best
    pub fn offer(&mut self, route: QuoteRoute) -> bool {
        self.offered += 1;
        let better = match &self.best {
            Some(best) => route.out_amount() > best.out_amount(),
            None => true,
        };
        if better {
            self.best = Some(route);
        }
        better
    }

    pub fn best(&self) -> Option<&QuoteRoute> {
        self.best.as_ref()
    }

    pub fn offered(&self) -> usize {
        self.offered
    }

    pub fn into_best(self) -> Option<QuoteRoute> {
        self.best
    }
}

/// Something that happened on one provider's lane
enum RaceEvent {
    Batch(usize, Vec<QuoteRoute>),
    Failed(usize, ProviderError),
    Finished(usize),
}

enum Lane<'a> {
    Opening(usize, &'a dyn QuoteProvider, &'a QuoteRequest),
    Open(usize, RouteStream),
    Done,
}

/// Turn one provider into a stream of race events
///
/// The lane owns its `RouteStream`; dropping the lane drops (and so closes) it.
fn lane<'a>(
    index: usize,
    provider: &'a dyn QuoteProvider,
    request: &'a QuoteRequest,
) -> BoxStream<'a, RaceEvent> {
    stream::unfold(Lane::Opening(index, provider, request), |state| async move {
        match state {
            Lane::Opening(index, provider, request) => match provider.get_routes(request).await {
                Ok(routes) => next_from(index, routes).await,
                Err(e) => Some((RaceEvent::Failed(index, e), Lane::Done)),
            },
            Lane::Open(index, routes) => next_from(index, routes).await,
            Lane::Done => None,
        }
    })
    .boxed()
}

async fn next_from<'a>(index: usize, mut routes: RouteStream) -> Option<(RaceEvent, Lane<'a>)> {
    match routes.next_batch().await {
        Some(Ok(batch)) => Some((RaceEvent::Batch(index, batch), Lane::Open(index, routes))),
        Some(Err(e)) => {
            routes.close();
            Some((RaceEvent::Failed(index, e), Lane::Done))
        }
        None => {
            routes.close();
            Some((RaceEvent::Finished(index), Lane::Done))
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct LaneProgress {
    batches: usize,
    finished: bool,
}

impl LaneProgress {
    fn satisfied(&self, target: BatchTarget) -> bool {
        match target {
            BatchTarget::MinBatches(n) => self.finished || self.batches >= n,
            BatchTarget::UntilClosed => self.finished,
        }
    }
}

/// Race `providers` for `request` and return the best route
///
/// The request's slippage fields are overwritten from `policy` so every
/// provider sees the same tolerance. Streams still open when the race stops
/// are closed before this returns.
pub async fn race_routes(
    providers: &[&dyn QuoteProvider],
    request: &QuoteRequest,
    policy: &RacePolicy,
) -> Result<QuoteRoute, AggregatorError> {
    if providers.is_empty() {
        return Err(AggregatorError::NoProviders);
    }

    let mut request = request.clone();
    request.max_slippage_bps = policy.slippage_bps;
    request.slippage_jitter_bps = policy.slippage_jitter_bps;
    let request = &request;

    let started = Instant::now();
    let _timer = scopeguard::guard((), |_| {
        metrics().race_duration.observe(started.elapsed().as_secs_f64());
    });

    let mut progress = vec![LaneProgress::default(); providers.len()];
    let mut errors: Vec<(String, ProviderError)> = Vec::new();
    let mut selector = RouteSelector::new();
    let mut events = stream::select_all(
        providers
            .iter()
            .enumerate()
            .map(|(index, provider)| lane(index, *provider, request)),
    );

    let deadline = policy.decision_window.map(|window| tokio::time::Instant::now() + window);
    let window = async move {
        match deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(window);

    loop {
        if progress.iter().all(|p| p.satisfied(policy.batch_target)) {
            debug!(target: "aggregator", "stop rule met");
            break;
        }

        let event = tokio::select! {
            _ = &mut window => {
                info!(target: "aggregator", elapsed_ms = started.elapsed().as_millis() as u64, "⏱️ Decision window elapsed");
                break;
            }
            event = events.next() => event,
        };

        let Some(event) = event else {
            break;
        };

        match event {
            RaceEvent::Batch(index, batch) => {
                let name = providers[index].name();
                progress[index].batches += 1;
                metrics().quote_batches.with_label_values(&[name]).inc();
                debug!(target: "aggregator", provider = name, routes = batch.len(), batch = progress[index].batches, "quote batch");

                for route in batch {
                    if !route.matches(request) {
                        warn!(
                            target: "aggregator",
                            provider = name,
                            input_mint = %route.input_mint(),
                            output_mint = %route.output_mint(),
                            "dropping route for a different pair or mode"
                        );
                        continue;
                    }
                    let out_amount = route.out_amount();
                    let route_provider = route.provider().to_string();
                    if selector.offer(route) {
                        debug!(target: "aggregator", provider = %route_provider, out_amount, "new best route");
                    }
                }
            }
            RaceEvent::Failed(index, e) => {
                let name = providers[index].name();
                progress[index].finished = true;
                warn!(target: "aggregator", provider = name, error = %e, category = e.category(), "provider failed");
                errors.push((name.to_string(), e));
            }
            RaceEvent::Finished(index) => {
                progress[index].finished = true;
                debug!(target: "aggregator", provider = providers[index].name(), "provider finished");
            }
        }
    }

    // Dropping the lanes closes every stream that is still open.
    drop(events);

    match selector.into_best() {
        Some(route) => {
            metrics()
                .routes_selected
                .with_label_values(&[route.provider()])
                .inc();
            info!(
                target: "aggregator",
                provider = route.provider(),
                in_amount = route.in_amount(),
                out_amount = route.out_amount(),
                "✓ Best route selected"
            );
            Ok(route)
        }
        None => Err(AggregatorError::NoQuoteAvailable {
            providers: providers.len(),
            errors,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{sample_request, sample_route, ScriptedProvider, StaticProvider};
    use crate::types::SwapMode;
    use proptest::prelude::*;

    #[test]
    fn test_selector_strictly_greater_keeps_first_on_tie() {
        let req = sample_request();
        let mut selector = RouteSelector::new();
        assert!(selector.offer(sample_route("a", &req, 100)));
        assert!(!selector.offer(sample_route("b", &req, 100)));
        assert!(selector.offer(sample_route("c", &req, 101)));
        assert!(!selector.offer(sample_route("d", &req, 50)));
        assert_eq!(selector.best().unwrap().provider(), "c");
        assert_eq!(selector.offered(), 4);
    }

    proptest! {
        #[test]
        fn prop_selector_picks_first_maximum(amounts in proptest::collection::vec(0u64..20, 1..30)) {
            let req = sample_request();
            let mut selector = RouteSelector::new();
            for (i, amount) in amounts.iter().enumerate() {
                selector.offer(sample_route(&i.to_string(), &req, *amount));
            }
            let max = *amounts.iter().max().unwrap();
            let first = amounts.iter().position(|a| *a == max).unwrap();
            let best = selector.best().unwrap();
            prop_assert_eq!(best.out_amount(), max);
            prop_assert_eq!(best.provider(), first.to_string());

            // replaying the same sequence selects the same route
            let mut replay = RouteSelector::new();
            for (i, amount) in amounts.iter().enumerate() {
                replay.offer(sample_route(&i.to_string(), &req, *amount));
            }
            prop_assert_eq!(replay.best(), selector.best());
        }
    }

    #[tokio::test]
    async fn test_min_batches_one_stops_after_first_batches() {
        let req = sample_request();
        let x = StaticProvider::new("x", vec![sample_route("x", &req, 1_000)]);
        let y = ScriptedProvider::new(
            "y",
            vec![
                (Duration::from_millis(0), vec![sample_route("y", &req, 900)]),
                (Duration::from_millis(300), vec![sample_route("y", &req, 1_100)]),
            ],
        );

        let policy = RacePolicy {
            batch_target: BatchTarget::MinBatches(1),
            ..RacePolicy::default()
        };
        let best = race_routes(&[&x, &y], &req, &policy).await.unwrap();
        assert_eq!(best.provider(), "x");
        assert_eq!(best.out_amount(), 1_000);

        // y's stream was closed once the race stopped
        y.wait_closed(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_until_closed_waits_for_improvement() {
        let req = sample_request();
        let x = StaticProvider::new("x", vec![sample_route("x", &req, 1_000)]);
        let y = ScriptedProvider::new(
            "y",
            vec![
                (Duration::from_millis(0), vec![sample_route("y", &req, 900)]),
                (Duration::from_millis(50), vec![sample_route("y", &req, 1_100)]),
            ],
        );

        let policy = RacePolicy {
            batch_target: BatchTarget::UntilClosed,
            ..RacePolicy::default()
        };
        let best = race_routes(&[&x, &y], &req, &policy).await.unwrap();
        assert_eq!(best.provider(), "y");
        assert_eq!(best.out_amount(), 1_100);
    }

    #[tokio::test]
    async fn test_decision_window_bounds_until_closed() {
        let req = sample_request();
        let y = ScriptedProvider::new(
            "y",
            vec![
                (Duration::from_millis(0), vec![sample_route("y", &req, 900)]),
                (Duration::from_secs(30), vec![sample_route("y", &req, 1_100)]),
            ],
        );

        let policy = RacePolicy {
            batch_target: BatchTarget::UntilClosed,
            decision_window: Some(Duration::from_millis(100)),
            ..RacePolicy::default()
        };
        let started = Instant::now();
        let best = race_routes(&[&y], &req, &policy).await.unwrap();
        assert_eq!(best.out_amount(), 900);
        assert!(started.elapsed() < Duration::from_secs(5));
        y.wait_closed(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_mismatched_routes_are_ignored() {
        let req = sample_request();
        let mut other = req.clone();
        other.mode = SwapMode::ExactOut;
        let x = StaticProvider::new("x", vec![sample_route("x", &other, 5_000)]);
        let y = StaticProvider::new("y", vec![sample_route("y", &req, 10)]);

        let best = race_routes(&[&x, &y], &req, &RacePolicy::default())
            .await
            .unwrap();
        assert_eq!(best.provider(), "y");
    }

    #[tokio::test]
    async fn test_no_quote_available_collects_errors() {
        let req = sample_request();
        let failing = StaticProvider::failing("x", ProviderError::NoRoute("none".into()));
        let empty = StaticProvider::new("y", vec![]);

        let err = race_routes(&[&failing, &empty], &req, &RacePolicy::default())
            .await
            .unwrap_err();
        match err {
            AggregatorError::NoQuoteAvailable { providers, errors } => {
                assert_eq!(providers, 2);
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].0, "x");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_providers() {
        let providers: Vec<&dyn QuoteProvider> = Vec::new();
        assert!(matches!(
            race_routes(&providers, &sample_request(), &RacePolicy::default()).await,
            Err(AggregatorError::NoProviders)
        ));
    }
}
