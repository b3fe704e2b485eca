//! Spot-price resolution with provider fallback and outcome caching.
//!
//! Two independent REST providers back the service. Every raw response is
//! classified into a closed [`PriceOutcome`]; `Success` and `MarketClosed`
//! are terminal facts cached forever, while a `TemporaryFailure` is cached
//! for one hour so a retry storm cannot hammer a rate-limited provider.

mod providers;
mod resolver;

pub use providers::{classify_marketstack, classify_tiingo, MarketStackClient, TiingoClient};
pub use resolver::{CacheStats, PriceResolver, ProviderStats, Resolution};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// How long a temporary failure stays cached before the provider is retried.
pub const FAILURE_TTL: Duration = Duration::from_secs(3600);

/// Why a provider call failed without settling the question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    RateLimit,
    Timeout,
    Unauthorized,
    ServerError,
    NetworkError,
    MissingCredentials,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimit => "rate_limit",
            Self::Timeout => "timeout",
            Self::Unauthorized => "unauthorized",
            Self::ServerError => "server_error",
            Self::NetworkError => "network_error",
            Self::MissingCredentials => "missing_credentials",
        }
    }
}

/// Classified result of one provider call for one (symbol, date).
///
/// `Success` and `MarketClosed` are permanent historical facts.
/// `TemporaryFailure` says nothing about the market, only about the call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PriceOutcome {
    Success { price: Decimal },
    MarketClosed,
    TemporaryFailure { kind: FailureKind, message: String },
}

impl PriceOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::TemporaryFailure { .. })
    }

    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::TemporaryFailure {
            kind,
            message: message.into(),
        }
    }
}

/// A spot-price provider. Classification of the raw response is the
/// provider's own responsibility; the resolver only sees [`PriceOutcome`].
pub trait SpotProvider {
    fn name(&self) -> &'static str;

    fn fetch(
        &self,
        symbol: &str,
        date: chrono::NaiveDate,
    ) -> impl Future<Output = PriceOutcome>;
}
