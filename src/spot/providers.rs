//! Spot-price provider clients and their response classification rules.
//!
//! Both providers key a day's bar by date; the absence of a data point for a
//! requested date means "market closed," not "request failed." Everything
//! else — rate limits, auth errors, transport problems — is a temporary
//! failure that leaves the question open for the other provider.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{FailureKind, PriceOutcome, SpotProvider};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn build_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_default()
}

fn classify_transport_error(err: &reqwest::Error) -> PriceOutcome {
    if err.is_timeout() {
        PriceOutcome::failure(FailureKind::Timeout, "request timed out")
    } else {
        PriceOutcome::failure(FailureKind::NetworkError, err.to_string())
    }
}

fn price_from_value(value: &Value) -> Option<Decimal> {
    Decimal::from_f64_retain(value.as_f64()?)
}

/// Classify a Tiingo daily-prices response body.
///
/// Tiingo answers with a JSON array of daily bars: a non-empty array with an
/// `open` field is a price, an empty array is a closed market, and an object
/// with an `error` field is a provider-side failure.
pub fn classify_tiingo(raw: &Value) -> PriceOutcome {
    if let Some(rows) = raw.as_array() {
        if let Some(open) = rows.first().and_then(|row| row.get("open")) {
            if let Some(price) = price_from_value(open) {
                return PriceOutcome::Success { price };
            }
        }
        return PriceOutcome::MarketClosed;
    }

    if let Some(obj) = raw.as_object() {
        if let Some(error) = obj.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .or_else(|| error.as_str())
                .unwrap_or("unknown provider error")
                .to_string();
            let lower = message.to_lowercase();
            let kind = if lower.contains("rate limit") {
                FailureKind::RateLimit
            } else if lower.contains("unauthorized") {
                FailureKind::Unauthorized
            } else {
                FailureKind::ServerError
            };
            return PriceOutcome::failure(kind, message);
        }
    }

    PriceOutcome::failure(
        FailureKind::ServerError,
        format!("unexpected response shape: {}", value_kind(raw)),
    )
}

/// Classify a MarketStack EOD response body.
///
/// MarketStack wraps bars in `{"data": [...]}`; errors carry an `error.code`
/// whose text distinguishes rate limiting from access problems.
pub fn classify_marketstack(raw: &Value) -> PriceOutcome {
    if let Some(obj) = raw.as_object() {
        if let Some(data) = obj.get("data").and_then(Value::as_array) {
            if let Some(open) = data.first().and_then(|row| row.get("open")) {
                if let Some(price) = price_from_value(open) {
                    return PriceOutcome::Success { price };
                }
            }
            return PriceOutcome::MarketClosed;
        }

        if let Some(error) = obj.get("error") {
            let code = error
                .get("code")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_lowercase();
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("provider error")
                .to_string();
            let kind = if code.contains("rate") || code.contains("limit") {
                FailureKind::RateLimit
            } else if code.contains("access") || code.contains("auth") {
                FailureKind::Unauthorized
            } else {
                FailureKind::ServerError
            };
            return PriceOutcome::failure(kind, message);
        }
    }

    PriceOutcome::failure(
        FailureKind::ServerError,
        format!("unexpected response shape: {}", value_kind(raw)),
    )
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Tiingo daily-prices client (primary provider).
pub struct TiingoClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl TiingoClient {
    pub fn new(token: Option<String>) -> Self {
        Self::with_base_url("https://api.tiingo.com", token)
    }

    pub fn with_base_url(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: build_client(),
            base_url: base_url.into(),
            token,
        }
    }
}

impl SpotProvider for TiingoClient {
    fn name(&self) -> &'static str {
        "tiingo"
    }

    async fn fetch(&self, symbol: &str, date: NaiveDate) -> PriceOutcome {
        let token = match &self.token {
            Some(token) => token,
            None => {
                return PriceOutcome::failure(
                    FailureKind::MissingCredentials,
                    "TIINGO_API_KEY not configured",
                )
            }
        };

        let day = date.format("%Y-%m-%d").to_string();
        let url = format!(
            "{}/tiingo/daily/{}/prices",
            self.base_url.trim_end_matches('/'),
            symbol
        );
        debug!(symbol, %date, "tiingo spot request");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("startDate", day.as_str()),
                ("endDate", day.as_str()),
                ("token", token.as_str()),
            ])
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => return classify_transport_error(&e),
        };

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return PriceOutcome::failure(FailureKind::RateLimit, "HTTP 429");
        }

        match response.json::<Value>().await {
            Ok(raw) => classify_tiingo(&raw),
            Err(e) => classify_transport_error(&e),
        }
    }
}

/// MarketStack EOD client (secondary provider).
pub struct MarketStackClient {
    client: reqwest::Client,
    base_url: String,
    access_key: Option<String>,
}

impl MarketStackClient {
    pub fn new(access_key: Option<String>) -> Self {
        Self::with_base_url("http://api.marketstack.com", access_key)
    }

    pub fn with_base_url(base_url: impl Into<String>, access_key: Option<String>) -> Self {
        Self {
            client: build_client(),
            base_url: base_url.into(),
            access_key,
        }
    }
}

impl SpotProvider for MarketStackClient {
    fn name(&self) -> &'static str {
        "marketstack"
    }

    async fn fetch(&self, symbol: &str, date: NaiveDate) -> PriceOutcome {
        let key = match &self.access_key {
            Some(key) => key,
            None => {
                return PriceOutcome::failure(
                    FailureKind::MissingCredentials,
                    "MARKETSTACK_API_KEY not configured",
                )
            }
        };

        let day = date.format("%Y-%m-%d").to_string();
        let url = format!("{}/v1/eod", self.base_url.trim_end_matches('/'));
        debug!(symbol, %date, "marketstack spot request");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("access_key", key.as_str()),
                ("symbols", symbol),
                ("date_from", day.as_str()),
                ("date_to", day.as_str()),
            ])
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => return classify_transport_error(&e),
        };

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return PriceOutcome::failure(FailureKind::RateLimit, "HTTP 429");
        }

        match response.json::<Value>().await {
            Ok(raw) => classify_marketstack(&raw),
            Err(e) => classify_transport_error(&e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_tiingo_success() {
        let raw = json!([{"date": "2018-01-02T00:00:00.000Z", "open": 1048.34, "close": 1065.0}]);
        assert_eq!(
            classify_tiingo(&raw),
            PriceOutcome::Success {
                price: dec!(1048.34)
            }
        );
    }

    #[test]
    fn test_tiingo_empty_array_is_market_closed() {
        assert_eq!(classify_tiingo(&json!([])), PriceOutcome::MarketClosed);
    }

    #[test]
    fn test_tiingo_rate_limit() {
        let raw = json!({"error": {"message": "You have exceeded your rate limit"}});
        match classify_tiingo(&raw) {
            PriceOutcome::TemporaryFailure { kind, .. } => {
                assert_eq!(kind, FailureKind::RateLimit)
            }
            other => panic!("expected temporary failure, got {:?}", other),
        }
    }

    #[test]
    fn test_tiingo_unauthorized() {
        let raw = json!({"error": "Unauthorized: invalid token"});
        match classify_tiingo(&raw) {
            PriceOutcome::TemporaryFailure { kind, .. } => {
                assert_eq!(kind, FailureKind::Unauthorized)
            }
            other => panic!("expected temporary failure, got {:?}", other),
        }
    }

    #[test]
    fn test_tiingo_unexpected_shape() {
        match classify_tiingo(&json!("oops")) {
            PriceOutcome::TemporaryFailure { kind, .. } => {
                assert_eq!(kind, FailureKind::ServerError)
            }
            other => panic!("expected temporary failure, got {:?}", other),
        }
    }

    #[test]
    fn test_marketstack_success() {
        let raw = json!({"data": [{"open": 89.54, "symbol": "GOOG"}]});
        assert_eq!(
            classify_marketstack(&raw),
            PriceOutcome::Success { price: dec!(89.54) }
        );
    }

    #[test]
    fn test_marketstack_empty_data_is_market_closed() {
        let raw = json!({"data": []});
        assert_eq!(classify_marketstack(&raw), PriceOutcome::MarketClosed);
    }

    #[test]
    fn test_marketstack_rate_limit_code() {
        let raw = json!({"error": {"code": "usage_limit_reached", "message": "Monthly limit hit"}});
        match classify_marketstack(&raw) {
            PriceOutcome::TemporaryFailure { kind, .. } => {
                assert_eq!(kind, FailureKind::RateLimit)
            }
            other => panic!("expected temporary failure, got {:?}", other),
        }
    }

    #[test]
    fn test_marketstack_access_error() {
        let raw = json!({"error": {"code": "invalid_access_key", "message": "Bad key"}});
        match classify_marketstack(&raw) {
            PriceOutcome::TemporaryFailure { kind, .. } => {
                assert_eq!(kind, FailureKind::Unauthorized)
            }
            other => panic!("expected temporary failure, got {:?}", other),
        }
    }
}
