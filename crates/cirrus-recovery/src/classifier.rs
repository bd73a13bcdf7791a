//! Keyword-based error classification

use serde::{Deserialize, Serialize};

/// Histogram bucket for a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Timeout,
    RateLimit,
    Server,
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Server => "server",
            ErrorCategory::Other => "other",
        }
    }
}

const DEFAULT_KEYWORDS: &[&str] = &[
    "network",
    "timeout",
    "timed out",
    "econnreset",
    "connection",
    "rate limit",
    "rate_limit",
    "too many requests",
    "429",
    "500",
    "502",
    "503",
    "504",
    "unavailable",
    "overloaded",
];

/// Decides whether a failure is transient
///
/// An error is retryable iff its message contains one of the keywords,
/// compared case-insensitively.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    keywords: Vec<String>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::with_keywords(DEFAULT_KEYWORDS.iter().copied())
    }
}

impl ErrorClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the keyword set
    pub fn with_keywords<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    pub fn add_keyword(&mut self, keyword: impl AsRef<str>) {
        let keyword = keyword.as_ref().to_lowercase();
        if !keyword.is_empty() && !self.keywords.contains(&keyword) {
            self.keywords.push(keyword);
        }
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn is_retryable(&self, message: &str) -> bool {
        let message = message.to_lowercase();
        self.keywords.iter().any(|k| message.contains(k.as_str()))
    }

    /// Bucket a failure message for the error histogram
    pub fn categorize(&self, message: &str) -> ErrorCategory {
        let message = message.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| message.contains(n));

        if has(&["rate limit", "rate_limit", "too many requests", "429"]) {
            ErrorCategory::RateLimit
        } else if has(&["timeout", "timed out"]) {
            ErrorCategory::Timeout
        } else if has(&["network", "econnreset", "connection"]) {
            ErrorCategory::Network
        } else if has(&["500", "502", "503", "504", "unavailable", "overloaded", "server"]) {
            ErrorCategory::Server
        } else {
            ErrorCategory::Other
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_keywords_match_transient_failures() {
        let classifier = ErrorClassifier::default();

        assert!(classifier.is_retryable("network error: ECONNRESET"));
        assert!(classifier.is_retryable("Request Timed Out"));
        assert!(classifier.is_retryable("HTTP 503: Service Unavailable"));
        assert!(classifier.is_retryable("Too Many Requests"));
        assert!(!classifier.is_retryable("HTTP 404: not found"));
        assert!(!classifier.is_retryable("permission denied"));
    }

    #[test]
    fn test_custom_keywords() {
        let mut classifier = ErrorClassifier::with_keywords(["Flaky"]);
        assert!(classifier.is_retryable("flaky backend"));
        assert!(!classifier.is_retryable("timeout"));

        classifier.add_keyword("TIMEOUT");
        classifier.add_keyword("timeout");
        assert_eq!(classifier.keywords().len(), 2);
        assert!(classifier.is_retryable("timeout"));
    }

    #[test]
    fn test_categories() {
        let classifier = ErrorClassifier::default();

        assert_eq!(classifier.categorize("HTTP 429: slow down"), ErrorCategory::RateLimit);
        assert_eq!(classifier.categorize("timeout: 30000 ms"), ErrorCategory::Timeout);
        assert_eq!(classifier.categorize("connection refused"), ErrorCategory::Network);
        assert_eq!(classifier.categorize("HTTP 502: bad gateway"), ErrorCategory::Server);
        assert_eq!(classifier.categorize("invalid path"), ErrorCategory::Other);
        assert_eq!(ErrorCategory::RateLimit.as_str(), "rate_limit");
    }
}
