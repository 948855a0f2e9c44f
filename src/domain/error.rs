//! Domain error types.

/// A parse error with position information for indicator-list parsing.
#[derive(Debug, Clone, thiserror::Error)]
#[error("parse error at position {position}: {message}")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    /// Format the error with a caret pointing at the error position in the input.
    pub fn display_with_context(&self, input: &str) -> String {
        let caret = " ".repeat(self.position) + "^";
        format!(
            "{input}\n{caret}\n{err}",
            input = input,
            caret = caret,
            err = self
        )
    }
}

/// Failure reported by a candle provider.
///
/// Only `Client` is terminal for a batch; everything else may succeed on a
/// later attempt.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("client error (HTTP {status}): {reason}")]
    Client { status: u16, reason: String },

    #[error("rate limited by provider")]
    RateLimited,

    #[error("server error (HTTP {status}): {reason}")]
    Server { status: u16, reason: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("all providers failed: {}", format_failures(.0))]
    AllFailed(Vec<(String, ProviderError)>),
}

fn format_failures(failures: &[(String, ProviderError)]) -> String {
    failures
        .iter()
        .map(|(name, err)| format!("{name}: {err}"))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ProviderError {
    /// Classify an HTTP status the way the backfill retry loop expects.
    pub fn from_status(status: u16, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        match status {
            429 => ProviderError::RateLimited,
            400..=499 => ProviderError::Client { status, reason },
            _ => ProviderError::Server { status, reason },
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Client { .. } => false,
            ProviderError::RateLimited
            | ProviderError::Server { .. }
            | ProviderError::Network(_) => true,
            ProviderError::AllFailed(failures) => {
                failures.iter().any(|(_, err)| err.is_retryable())
            }
        }
    }
}

/// Top-level error type for regimetrader.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    IndicatorParse(#[from] ParseError),

    #[error("strategy store error: {reason}")]
    StrategyStore { reason: String },

    #[error("no data for {symbol} ({timeframe})")]
    NoData { symbol: String, timeframe: String },

    #[error("insufficient data for {symbol}: have {candles} candles, need {minimum}")]
    InsufficientData {
        symbol: String,
        candles: usize,
        minimum: usize,
    },

    #[error("invalid candle series: {reason}")]
    InvalidSeries { reason: String },

    #[error("look-ahead violation: index {index} with only {len} candles available")]
    LookAhead { index: usize, len: usize },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<&EngineError> for std::process::ExitCode {
    fn from(err: &EngineError) -> Self {
        let code: u8 = match err {
            EngineError::Io(_) => 1,
            EngineError::ConfigParse { .. }
            | EngineError::ConfigMissing { .. }
            | EngineError::ConfigInvalid { .. } => 2,
            EngineError::Database { .. }
            | EngineError::DatabaseQuery { .. }
            | EngineError::Provider(_) => 3,
            EngineError::IndicatorParse(_) | EngineError::StrategyStore { .. } => 4,
            EngineError::NoData { .. } | EngineError::InsufficientData { .. } => 5,
            EngineError::InvalidSeries { .. } | EngineError::LookAhead { .. } => 6,
        };
        std::process::ExitCode::from(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(ProviderError::from_status(429, "slow down"), ProviderError::RateLimited);
        assert!(matches!(
            ProviderError::from_status(404, "nope"),
            ProviderError::Client { status: 404, .. }
        ));
        assert!(matches!(
            ProviderError::from_status(503, "busy"),
            ProviderError::Server { status: 503, .. }
        ));
    }

    #[test]
    fn client_errors_are_terminal() {
        assert!(!ProviderError::from_status(400, "bad").is_retryable());
        assert!(ProviderError::RateLimited.is_retryable());
        assert!(ProviderError::Network("reset".into()).is_retryable());
        assert!(ProviderError::from_status(500, "oops").is_retryable());
    }

    #[test]
    fn aggregated_failure_retryable_if_any_member_is() {
        let all_client = ProviderError::AllFailed(vec![
            ("a".into(), ProviderError::from_status(404, "x")),
            ("b".into(), ProviderError::from_status(403, "y")),
        ]);
        assert!(!all_client.is_retryable());

        let mixed = ProviderError::AllFailed(vec![
            ("a".into(), ProviderError::from_status(404, "x")),
            ("b".into(), ProviderError::Network("timeout".into())),
        ]);
        assert!(mixed.is_retryable());
        assert!(mixed.to_string().contains("b: network error: timeout"));
    }

    #[test]
    fn parse_error_context_points_at_position() {
        let err = ParseError {
            message: "unknown indicator".into(),
            position: 4,
        };
        let rendered = err.display_with_context("rsi,foo:1");
        assert!(rendered.contains("\n    ^\n"));
    }

    #[test]
    fn provider_error_converts_into_engine_error() {
        let err: EngineError = ProviderError::RateLimited.into();
        assert!(matches!(err, EngineError::Provider(ProviderError::RateLimited)));
        assert_eq!(err.to_string(), "rate limited by provider");
    }
}
