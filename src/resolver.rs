//! Lazily loaded, process-wide locality resolver.
//!
//! The dataset is fetched and compiled on the first resolution request and
//! kept for the rest of the process. Concurrent first requests share one
//! load; a failed load is forgotten so a later request can try again.

use std::sync::{Arc, LazyLock};
use std::time::Instant;

use thiserror::Error;
use tokio::sync::RwLock;

use crate::cache::SingleFlight;
use crate::config::Config;
use crate::dataset::{DatasetSource, LoadError, source_for_location};
use crate::index::CompiledIndex;
use crate::types::{FailureReason, LocalityMatch, ResolveFailure};

/// Why a resolution request produced no locality
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    /// The dataset could not be loaded; retrying later may succeed
    #[error(transparent)]
    Load(Arc<LoadError>),
    /// The input did not map to a locality
    #[error(transparent)]
    Unresolved(ResolveFailure),
}

impl ResolveError {
    /// Reason code for user-facing failures
    pub fn reason(&self) -> Option<FailureReason> {
        match self {
            Self::Load(_) => None,
            Self::Unresolved(failure) => Some(failure.reason),
        }
    }
}

/// Resolver handle; clones share the same source and cache.
#[derive(Clone)]
pub struct LocalityResolver {
    source: Arc<RwLock<Arc<dyn DatasetSource>>>,
    index: SingleFlight<CompiledIndex, LoadError>,
}

static GLOBAL: LazyLock<LocalityResolver> = LazyLock::new(|| {
    let config = Config::from_env();
    let client = wreq::Client::new();
    LocalityResolver::from_boxed(source_for_location(&client, &config.dataset))
});

impl LocalityResolver {
    pub fn new(source: impl DatasetSource + 'static) -> Self {
        Self::from_boxed(Box::new(source))
    }

    pub fn from_boxed(source: Box<dyn DatasetSource>) -> Self {
        Self {
            source: Arc::new(RwLock::new(Arc::from(source))),
            index: SingleFlight::new(),
        }
    }

    /// Shared instance configured from the environment (`LOCALITY_DATA`).
    pub fn global() -> &'static LocalityResolver {
        &GLOBAL
    }

    /// The compiled index, loading it on first use.
    pub async fn index(&self) -> Result<Arc<CompiledIndex>, Arc<LoadError>> {
        let source = Arc::clone(&*self.source.read().await);
        self.index
            .get_or_load(|| {
                let described = source.describe();
                let fetch = source.fetch();
                async move {
                    let started = Instant::now();
                    tracing::info!(source = %described, "loading locality dataset");
                    let outcome = fetch.await.and_then(CompiledIndex::build);
                    match &outcome {
                        Ok(index) => tracing::info!(
                            source = %described,
                            localities = index.locality_count(),
                            zips = index.zip_count(),
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "locality dataset ready"
                        ),
                        Err(e) => tracing::warn!(source = %described, error = %e, "locality dataset load failed"),
                    }
                    outcome
                }
            })
            .await
    }

    /// Resolve raw user input to a locality.
    ///
    /// Blank input is rejected without touching the dataset.
    pub async fn resolve(&self, raw_input: &str) -> Result<LocalityMatch, ResolveError> {
        if raw_input.trim().is_empty() {
            return Err(ResolveError::Unresolved(ResolveFailure::new(
                FailureReason::EmptyInput,
                "No location provided.",
            )));
        }
        let index = self.index().await.map_err(ResolveError::Load)?;
        index.resolve(raw_input).map_err(ResolveError::Unresolved)
    }

    /// Drop the cached index; the next request loads again.
    pub async fn reset(&self) {
        self.index.reset().await;
    }

    /// Drop the cached index and load it again right away.
    pub async fn reload(&self) -> Result<Arc<CompiledIndex>, Arc<LoadError>> {
        self.reset().await;
        self.index().await
    }

    /// Point the resolver at a different dataset and drop the cache.
    pub async fn replace_source(&self, source: impl DatasetSource + 'static) {
        let source: Arc<dyn DatasetSource> = Arc::new(source);
        *self.source.write().await = source;
        self.reset().await;
    }

    /// Whether a dataset is currently loaded
    pub async fn is_loaded(&self) -> bool {
        self.index.peek().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::StaticSource;
    use crate::types::{Dataset, LocalityRecord, MatchVia};
    use futures::FutureExt;
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn alaska() -> Dataset {
        Dataset {
            localities: vec![LocalityRecord {
                state: "Alaska".to_string(),
                state_abbr: "AK".to_string(),
                locality_number: "01".to_string(),
                mac: "02102".to_string(),
                locality_label: "Alaska".to_string(),
                fee_schedule_area: "Statewide".to_string(),
                counties: vec![],
                search_terms: vec!["ALASKA".to_string()],
                is_statewide: true,
                is_rest_of_state: false,
            }],
            ..Default::default()
        }
    }

    /// Fails the first `failures` fetches, then serves the dataset.
    struct FlakySource {
        calls: Arc<AtomicUsize>,
        failures: usize,
    }

    impl DatasetSource for FlakySource {
        fn fetch(&self) -> BoxFuture<'static, Result<Dataset, LoadError>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let failures = self.failures;
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                if call < failures {
                    Err(LoadError::Http {
                        url: "https://example.org/locality-mapping.json".to_string(),
                        status: 503,
                    })
                } else {
                    Ok(alaska())
                }
            }
            .boxed()
        }

        fn describe(&self) -> String {
            "flaky".to_string()
        }
    }

    #[tokio::test]
    async fn test_blank_input_does_not_load() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = LocalityResolver::new(FlakySource {
            calls: Arc::clone(&calls),
            failures: 0,
        });
        let err = resolver.resolve("   ").await.unwrap_err();
        assert_eq!(err.reason(), Some(FailureReason::EmptyInput));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_first_requests_share_load() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = LocalityResolver::new(FlakySource {
            calls: Arc::clone(&calls),
            failures: 0,
        });

        let (a, b, c) = tokio::join!(
            resolver.resolve("AK"),
            resolver.resolve("Alaska"),
            resolver.resolve("99999"),
        );
        assert_eq!(a.unwrap().via, MatchVia::State);
        assert!(matches!(b.unwrap().via, MatchVia::Term { .. }));
        assert_eq!(c.unwrap_err().reason(), Some(FailureReason::UnknownZip));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_load_is_retried_on_next_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = LocalityResolver::new(FlakySource {
            calls: Arc::clone(&calls),
            failures: 1,
        });

        let (first, second) = tokio::join!(resolver.resolve("AK"), resolver.resolve("AK"));
        assert!(matches!(first, Err(ResolveError::Load(_))));
        assert!(matches!(second, Err(ResolveError::Load(_))));
        assert!(!resolver.is_loaded().await);

        let third = resolver.resolve("AK").await.unwrap();
        assert_eq!(third.locality.state_abbr, "AK");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(resolver.is_loaded().await);
    }

    #[tokio::test]
    async fn test_global_instance_is_shared() {
        let global = LocalityResolver::global();
        assert!(std::ptr::eq(global, LocalityResolver::global()));

        // Clones share the source and the cache with the process-wide instance
        let handle = global.clone();
        handle.replace_source(StaticSource::new(alaska())).await;
        let found = LocalityResolver::global().resolve("AK").await.unwrap();
        assert_eq!(found.locality.mac, "02102");
        assert!(global.is_loaded().await);
    }

    #[tokio::test]
    async fn test_replace_source_swaps_dataset() {
        let resolver = LocalityResolver::new(StaticSource::new(Dataset::default()));
        let err = resolver.resolve("AK").await.unwrap_err();
        assert_eq!(err.reason(), Some(FailureReason::NoMatch));

        resolver.replace_source(StaticSource::new(alaska())).await;
        let found = resolver.resolve("AK").await.unwrap();
        assert_eq!(found.locality.mac, "02102");

        let reloaded = resolver.reload().await.unwrap();
        assert_eq!(reloaded.locality_count(), 1);
    }
}
