//! Primary/secondary price resolution over the outcome cache.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::cache::KvStore;
use crate::data::terminal::wire_date;

use super::{PriceOutcome, SpotProvider, FAILURE_TTL};

/// Final answer for one (symbol, date) after cache and both providers.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Opening price found.
    Price(Decimal),
    /// At least one provider confirmed the market was closed.
    MarketClosed,
    /// Both providers exhausted without a terminal answer.
    Unavailable,
}

impl Resolution {
    pub fn price(&self) -> Option<Decimal> {
        match self {
            Self::Price(p) => Some(*p),
            _ => None,
        }
    }
}

/// Per-provider cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderStats {
    pub total: usize,
    pub success: usize,
    pub market_closed: usize,
    pub failures: usize,
}

/// Aggregate price-cache statistics.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub total_entries: usize,
    pub by_provider: Vec<(String, ProviderStats)>,
}

/// Resolves a symbol's opening price on a date through a primary provider
/// with failover to a secondary, caching every classified outcome.
pub struct PriceResolver<P, S> {
    primary: P,
    secondary: S,
    store: Box<dyn KvStore>,
}

impl<P: SpotProvider, S: SpotProvider> PriceResolver<P, S> {
    pub fn new(primary: P, secondary: S, store: Box<dyn KvStore>) -> Self {
        Self {
            primary,
            secondary,
            store,
        }
    }

    fn cache_key(provider: &str, symbol: &str, date: NaiveDate) -> String {
        format!("{}:{}:{}", provider, symbol, wire_date(date))
    }

    fn cached_outcome(&self, provider: &str, symbol: &str, date: NaiveDate) -> Option<PriceOutcome> {
        let entry = self.store.get(&Self::cache_key(provider, symbol, date))?;
        match serde_json::from_value(entry.value) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(provider, symbol, %date, error = %e, "dropping undecodable price cache entry");
                None
            }
        }
    }

    fn cache_outcome(&mut self, provider: &str, symbol: &str, date: NaiveDate, outcome: &PriceOutcome) {
        let value = match serde_json::to_value(outcome) {
            Ok(v) => v,
            Err(_) => return,
        };
        let ttl = if outcome.is_terminal() {
            None
        } else {
            Some(FAILURE_TTL)
        };
        self.store
            .put(&Self::cache_key(provider, symbol, date), value, ttl);
    }

    /// Run one provider leg: cached terminal outcome, cached failure, or a
    /// fresh call whose outcome is cached. Returns the outcome that should
    /// drive the fallback decision.
    async fn resolve_leg<T: SpotProvider>(
        store: &mut Box<dyn KvStore>,
        provider: &T,
        symbol: &str,
        date: NaiveDate,
    ) -> PriceOutcome {
        let key = Self::cache_key(provider.name(), symbol, date);
        if let Some(entry) = store.get(&key) {
            if let Ok(outcome) = serde_json::from_value::<PriceOutcome>(entry.value) {
                debug!(provider = provider.name(), symbol, %date, "price cache hit");
                return outcome;
            }
        }

        let outcome = provider.fetch(symbol, date).await;
        let ttl = if outcome.is_terminal() {
            None
        } else {
            Some(FAILURE_TTL)
        };
        if let Ok(value) = serde_json::to_value(&outcome) {
            store.put(&key, value, ttl);
        }
        outcome
    }

    /// Resolve the opening price for `symbol` on `date`.
    ///
    /// Fallback order: primary cache, fresh primary call, secondary cache,
    /// fresh secondary call. A (possibly cached) temporary failure on the
    /// primary falls through to the secondary; only a terminal outcome stops
    /// the chain.
    pub async fn resolve_open(&mut self, symbol: &str, date: NaiveDate) -> Resolution {
        let primary_outcome =
            Self::resolve_leg(&mut self.store, &self.primary, symbol, date).await;

        match primary_outcome {
            PriceOutcome::Success { price } => return Resolution::Price(price),
            PriceOutcome::MarketClosed => return Resolution::MarketClosed,
            PriceOutcome::TemporaryFailure { kind, .. } => {
                debug!(
                    provider = self.primary.name(),
                    symbol, %date, kind = kind.as_str(),
                    "primary provider failed, trying secondary"
                );
            }
        }

        let secondary_outcome =
            Self::resolve_leg(&mut self.store, &self.secondary, symbol, date).await;

        match secondary_outcome {
            PriceOutcome::Success { price } => Resolution::Price(price),
            PriceOutcome::MarketClosed => Resolution::MarketClosed,
            PriceOutcome::TemporaryFailure { kind, message } => {
                warn!(
                    symbol, %date, kind = kind.as_str(), message,
                    "both spot providers exhausted"
                );
                Resolution::Unavailable
            }
        }
    }

    /// Convenience wrapper collapsing closed/unavailable to `None`.
    pub async fn resolve_open_price(&mut self, symbol: &str, date: NaiveDate) -> Option<Decimal> {
        self.resolve_open(symbol, date).await.price()
    }

    /// Compute statistics over the current cache contents.
    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        for name in [self.primary.name(), self.secondary.name()] {
            let mut provider_stats = ProviderStats::default();
            let prefix = format!("{}:", name);
            for key in self.store.keys() {
                if !key.starts_with(&prefix) {
                    continue;
                }
                let Some(entry) = self.store.get(&key) else {
                    continue;
                };
                let Ok(outcome) = serde_json::from_value::<PriceOutcome>(entry.value) else {
                    continue;
                };
                provider_stats.total += 1;
                match outcome {
                    PriceOutcome::Success { .. } => provider_stats.success += 1,
                    PriceOutcome::MarketClosed => provider_stats.market_closed += 1,
                    PriceOutcome::TemporaryFailure { .. } => provider_stats.failures += 1,
                }
            }
            stats.total_entries += provider_stats.total;
            stats.by_provider.push((name.to_string(), provider_stats));
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::spot::FailureKind;
    use rust_decimal_macros::dec;
    use std::cell::Cell;

    /// Scripted provider that counts calls.
    struct ScriptedProvider {
        name: &'static str,
        outcome: PriceOutcome,
        calls: Cell<usize>,
    }

    impl ScriptedProvider {
        fn new(name: &'static str, outcome: PriceOutcome) -> Self {
            Self {
                name,
                outcome,
                calls: Cell::new(0),
            }
        }
    }

    impl SpotProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn fetch(&self, _symbol: &str, _date: NaiveDate) -> PriceOutcome {
            self.calls.set(self.calls.get() + 1);
            self.outcome.clone()
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2018, 1, 2).unwrap()
    }

    #[tokio::test]
    async fn test_primary_success_skips_secondary() {
        let primary = ScriptedProvider::new("tiingo", PriceOutcome::Success { price: dec!(1048.34) });
        let secondary = ScriptedProvider::new("marketstack", PriceOutcome::Success { price: dec!(1.0) });
        let mut resolver = PriceResolver::new(primary, secondary, Box::new(MemoryStore::new()));

        let resolution = resolver.resolve_open("GOOG", date()).await;
        assert_eq!(resolution, Resolution::Price(dec!(1048.34)));
        assert_eq!(resolver.secondary.calls.get(), 0);
    }

    #[tokio::test]
    async fn test_market_closed_is_cached_with_no_further_calls() {
        let primary = ScriptedProvider::new("tiingo", PriceOutcome::MarketClosed);
        let secondary =
            ScriptedProvider::new("marketstack", PriceOutcome::Success { price: dec!(1.0) });
        let mut resolver = PriceResolver::new(primary, secondary, Box::new(MemoryStore::new()));

        assert_eq!(
            resolver.resolve_open("GOOG", date()).await,
            Resolution::MarketClosed
        );
        assert!(resolver.resolve_open_price("GOOG", date()).await.is_none());

        // Second resolution is a cache hit: exactly one provider call total.
        assert_eq!(resolver.primary.calls.get(), 1);
        assert_eq!(resolver.secondary.calls.get(), 0);
    }

    #[tokio::test]
    async fn test_failover_to_secondary() {
        let primary = ScriptedProvider::new(
            "tiingo",
            PriceOutcome::failure(FailureKind::RateLimit, "429"),
        );
        let secondary =
            ScriptedProvider::new("marketstack", PriceOutcome::Success { price: dec!(89.54) });
        let mut resolver = PriceResolver::new(primary, secondary, Box::new(MemoryStore::new()));

        let resolution = resolver.resolve_open("GOOG", date()).await;
        assert_eq!(resolution, Resolution::Price(dec!(89.54)));
        assert_eq!(resolver.primary.calls.get(), 1);
        assert_eq!(resolver.secondary.calls.get(), 1);
    }

    #[tokio::test]
    async fn test_cached_primary_failure_still_reaches_secondary() {
        let primary = ScriptedProvider::new(
            "tiingo",
            PriceOutcome::failure(FailureKind::Timeout, "timed out"),
        );
        let secondary =
            ScriptedProvider::new("marketstack", PriceOutcome::Success { price: dec!(89.54) });
        let mut resolver = PriceResolver::new(primary, secondary, Box::new(MemoryStore::new()));

        // First pass caches the primary failure and the secondary success.
        assert_eq!(
            resolver.resolve_open("GOOG", date()).await,
            Resolution::Price(dec!(89.54))
        );
        // Second pass: primary failure is served from cache (no new call),
        // secondary success comes from cache too.
        assert_eq!(
            resolver.resolve_open("GOOG", date()).await,
            Resolution::Price(dec!(89.54))
        );
        assert_eq!(resolver.primary.calls.get(), 1);
        assert_eq!(resolver.secondary.calls.get(), 1);
    }

    #[tokio::test]
    async fn test_both_exhausted_is_unavailable() {
        let primary = ScriptedProvider::new(
            "tiingo",
            PriceOutcome::failure(FailureKind::ServerError, "500"),
        );
        let secondary = ScriptedProvider::new(
            "marketstack",
            PriceOutcome::failure(FailureKind::MissingCredentials, "no key"),
        );
        let mut resolver = PriceResolver::new(primary, secondary, Box::new(MemoryStore::new()));

        assert_eq!(
            resolver.resolve_open("GOOG", date()).await,
            Resolution::Unavailable
        );
    }

    #[tokio::test]
    async fn test_stats_counts_by_outcome() {
        let primary = ScriptedProvider::new("tiingo", PriceOutcome::MarketClosed);
        let secondary =
            ScriptedProvider::new("marketstack", PriceOutcome::Success { price: dec!(1.0) });
        let mut resolver = PriceResolver::new(primary, secondary, Box::new(MemoryStore::new()));

        resolver.resolve_open("GOOG", date()).await;
        resolver
            .resolve_open("GOOG", NaiveDate::from_ymd_opt(2018, 1, 3).unwrap())
            .await;

        let stats = resolver.stats();
        assert_eq!(stats.total_entries, 2);
        let tiingo = &stats.by_provider[0];
        assert_eq!(tiingo.0, "tiingo");
        assert_eq!(tiingo.1.market_closed, 2);
    }
}
