//! Configuration constants, client configuration and validation functions.
//!
//! A `ClientConfig` is built once and handed to a client at construction
//! time. A process-wide default is available through [`default_config`];
//! it can be set exactly once with [`init_default_config`] and is read-only
//! afterwards. Per-client overrides clone the default instead of mutating it.

use std::sync::{LazyLock, OnceLock};
use std::time::Duration;

use chrono::NaiveDate;
use regex::Regex;

use crate::error::{HarvesterError, Result};

/// Base URL for the EUR-Lex website (direct markup and PDF endpoints).
pub const EURLEX_BASE_URL: &str = "https://eur-lex.europa.eu";

/// Base URL for CELLAR resources (work, expression, manifestation URIs).
pub const CELLAR_BASE_URL: &str = "http://publications.europa.eu";

/// Public SPARQL endpoint over the CELLAR metadata graph.
pub const SPARQL_ENDPOINT: &str = "https://publications.europa.eu/webapi/rdf/sparql";

/// HTTP timeout in seconds.
pub const HTTP_TIMEOUT_SECS: u64 = 30;

/// Default delay between two dispatched requests of one client (milliseconds).
pub const DEFAULT_REQUEST_DELAY_MS: u64 = 500;

/// Default maximum number of retries for transient failures.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before the first retry (milliseconds).
pub const DEFAULT_RETRY_DELAY_MS: u64 = 2000;

/// Default exponential backoff multiplier.
pub const DEFAULT_RETRY_BACKOFF: f64 = 2.0;

/// Default document language.
pub const DEFAULT_LANGUAGE: &str = "EN";

/// User agent string identifying this harvester.
pub const USER_AGENT: &str = concat!("eurlex-harvester/", env!("CARGO_PKG_VERSION"));

/// User agent used with the browser header profile.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Date pattern: YYYY-MM-DD.
#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static DATE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid regex"));

/// Retry policy for transient failures.
///
/// The delay before retry `attempt` (counted from 0) is
/// `retry_delay * retry_backoff^attempt`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub retry_backoff: f64,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_retries: u32, retry_delay: Duration, retry_backoff: f64) -> Self {
        Self {
            max_retries,
            retry_delay,
            retry_backoff,
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, 1.0)
    }

    /// Delay to wait before retry number `attempt` (0-based).
    ///
    /// # Examples
    /// ```
    /// use std::time::Duration;
    /// use eurlex_harvester::config::RetryPolicy;
    ///
    /// let policy = RetryPolicy::new(3, Duration::from_secs(2), 2.0);
    /// assert_eq!(policy.delay_for(0), Duration::from_secs(2));
    /// assert_eq!(policy.delay_for(1), Duration::from_secs(4));
    /// assert_eq!(policy.delay_for(2), Duration::from_secs(8));
    /// ```
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let factor = self.retry_backoff.powi(exponent);
        if !factor.is_finite() || factor < 0.0 {
            return self.retry_delay;
        }
        Duration::try_from_secs_f64(self.retry_delay.as_secs_f64() * factor)
            .unwrap_or(Duration::MAX)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_RETRIES,
            Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            DEFAULT_RETRY_BACKOFF,
        )
    }
}

/// How to settle a metadata lookup that returns several rows for one
/// document with the same latest date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TieBreak {
    /// Pick the row with the lexicographically smallest raw identifier.
    #[default]
    LowestRawId,
    /// Report the lookup as ambiguous.
    Reject,
}

/// Endpoint base URLs. Overridable for tests and mirrors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub eurlex_base_url: String,
    pub cellar_base_url: String,
    pub sparql_endpoint: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            eurlex_base_url: EURLEX_BASE_URL.to_string(),
            cellar_base_url: CELLAR_BASE_URL.to_string(),
            sparql_endpoint: SPARQL_ENDPOINT.to_string(),
        }
    }
}

/// Immutable client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub timeout: Duration,
    /// Extra headers sent with every request, after the profile headers.
    pub headers: Vec<(String, String)>,
    pub request_delay: Duration,
    pub use_browser_headers: bool,
    pub referer: Option<String>,
    pub raise_on_challenge: bool,
    pub sparql_fallback: bool,
    pub retry: RetryPolicy,
    pub sparql_retry: RetryPolicy,
    pub tie_break: TieBreak,
    pub language: String,
    pub endpoints: Endpoints,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(HTTP_TIMEOUT_SECS),
            headers: Vec::new(),
            request_delay: Duration::from_millis(DEFAULT_REQUEST_DELAY_MS),
            use_browser_headers: true,
            referer: Some(format!("{EURLEX_BASE_URL}/")),
            raise_on_challenge: false,
            sparql_fallback: true,
            retry: RetryPolicy::default(),
            sparql_retry: RetryPolicy::default(),
            tie_break: TieBreak::default(),
            language: DEFAULT_LANGUAGE.to_string(),
            endpoints: Endpoints::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from `EURLEX_*` environment variables, falling
    /// back to defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let timeout_secs = env_parse("EURLEX_TIMEOUT_SECS").unwrap_or(HTTP_TIMEOUT_SECS);
        let request_delay_ms =
            env_parse("EURLEX_REQUEST_DELAY_MS").unwrap_or(DEFAULT_REQUEST_DELAY_MS);
        let use_browser_headers =
            env_flag("EURLEX_BROWSER_HEADERS").unwrap_or(defaults.use_browser_headers);
        let referer = std::env::var("EURLEX_REFERER").ok().or(defaults.referer);
        let raise_on_challenge =
            env_flag("EURLEX_RAISE_ON_CHALLENGE").unwrap_or(defaults.raise_on_challenge);
        let sparql_fallback =
            env_flag("EURLEX_SPARQL_FALLBACK").unwrap_or(defaults.sparql_fallback);

        let retry = RetryPolicy::new(
            env_parse("EURLEX_MAX_RETRIES").unwrap_or(DEFAULT_MAX_RETRIES),
            Duration::from_millis(env_parse("EURLEX_RETRY_DELAY_MS").unwrap_or(DEFAULT_RETRY_DELAY_MS)),
            env_parse("EURLEX_RETRY_BACKOFF").unwrap_or(DEFAULT_RETRY_BACKOFF),
        );

        let language = std::env::var("EURLEX_LANGUAGE").unwrap_or(defaults.language);

        let endpoints = Endpoints {
            eurlex_base_url: std::env::var("EURLEX_BASE_URL")
                .unwrap_or(defaults.endpoints.eurlex_base_url),
            cellar_base_url: std::env::var("EURLEX_CELLAR_BASE_URL")
                .unwrap_or(defaults.endpoints.cellar_base_url),
            sparql_endpoint: std::env::var("EURLEX_SPARQL_ENDPOINT")
                .unwrap_or(defaults.endpoints.sparql_endpoint),
        };

        Self {
            timeout: Duration::from_secs(timeout_secs),
            headers: Vec::new(),
            request_delay: Duration::from_millis(request_delay_ms),
            use_browser_headers,
            referer,
            raise_on_challenge,
            sparql_fallback,
            sparql_retry: retry.clone(),
            retry,
            tie_break: TieBreak::default(),
            language,
            endpoints,
        }
    }

    /// Start a builder from the defaults.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder {
            config: Self::default(),
        }
    }

    /// Start a builder from this configuration, leaving `self` untouched.
    pub fn to_builder(&self) -> ClientConfigBuilder {
        ClientConfigBuilder {
            config: self.clone(),
        }
    }

    /// Headers for a request: profile headers, referer, then extra headers.
    #[must_use]
    pub fn request_headers(&self) -> Vec<(String, String)> {
        let mut headers: Vec<(String, String)> = if self.use_browser_headers {
            vec![
                ("User-Agent".into(), BROWSER_USER_AGENT.into()),
                (
                    "Accept".into(),
                    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".into(),
                ),
                ("Accept-Language".into(), "en-US,en;q=0.9".into()),
                ("Cache-Control".into(), "no-cache".into()),
                ("Upgrade-Insecure-Requests".into(), "1".into()),
            ]
        } else {
            vec![("User-Agent".into(), USER_AGENT.into())]
        };

        if let Some(referer) = &self.referer {
            headers.push(("Referer".into(), referer.clone()));
        }

        headers.extend(self.headers.iter().cloned());
        headers
    }
}

/// Builder for `ClientConfig`.
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.headers.push((name.into(), value.into()));
        self
    }

    pub fn request_delay(mut self, delay: Duration) -> Self {
        self.config.request_delay = delay;
        self
    }

    pub fn use_browser_headers(mut self, enabled: bool) -> Self {
        self.config.use_browser_headers = enabled;
        self
    }

    pub fn referer(mut self, referer: Option<String>) -> Self {
        self.config.referer = referer;
        self
    }

    pub fn raise_on_challenge(mut self, raise: bool) -> Self {
        self.config.raise_on_challenge = raise;
        self
    }

    pub fn sparql_fallback(mut self, enabled: bool) -> Self {
        self.config.sparql_fallback = enabled;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.retry.max_retries = max_retries;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry.retry_delay = delay;
        self
    }

    pub fn retry_backoff(mut self, backoff: f64) -> Self {
        self.config.retry.retry_backoff = backoff;
        self
    }

    pub fn sparql_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.sparql_retry = policy;
        self
    }

    pub fn tie_break(mut self, tie_break: TieBreak) -> Self {
        self.config.tie_break = tie_break;
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.config.language = language.into();
        self
    }

    pub fn eurlex_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.endpoints.eurlex_base_url = url.into();
        self
    }

    pub fn cellar_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.endpoints.cellar_base_url = url.into();
        self
    }

    pub fn sparql_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.endpoints.sparql_endpoint = url.into();
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

static DEFAULT_CONFIG: OnceLock<ClientConfig> = OnceLock::new();

/// Process-wide default configuration.
///
/// Initialized lazily with `ClientConfig::default()` unless
/// [`init_default_config`] ran first.
pub fn default_config() -> &'static ClientConfig {
    DEFAULT_CONFIG.get_or_init(ClientConfig::default)
}

/// Set the process-wide default configuration.
///
/// Fails if the default was already set or already read.
pub fn init_default_config(config: ClientConfig) -> Result<()> {
    DEFAULT_CONFIG.set(config).map_err(|_| {
        HarvesterError::Config("default configuration is already initialized".to_string())
    })
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| v != "false" && v != "0")
}

/// Validate and parse a date (YYYY-MM-DD).
///
/// # Examples
/// ```
/// use eurlex_harvester::config::validate_date;
///
/// assert!(validate_date("2025-01-01").is_ok());
/// assert!(validate_date("invalid").is_err());
/// assert!(validate_date("2025-13-01").is_err()); // Invalid month
/// ```
pub fn validate_date(date_str: &str) -> Result<NaiveDate> {
    if !DATE_PATTERN.is_match(date_str) {
        return Err(HarvesterError::InvalidDate(date_str.to_string()));
    }

    NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .map_err(|_| HarvesterError::InvalidDate(date_str.to_string()))
}

/// Map a two-letter language code to the three-letter EU authority code
/// used by CELLAR (`EN` → `ENG`).
#[must_use]
pub fn authority_language(code: &str) -> String {
    let upper = code.to_uppercase();
    let mapped = match upper.as_str() {
        "BG" => "BUL",
        "CS" => "CES",
        "DA" => "DAN",
        "DE" => "DEU",
        "EL" => "ELL",
        "EN" => "ENG",
        "ES" => "SPA",
        "ET" => "EST",
        "FI" => "FIN",
        "FR" => "FRA",
        "GA" => "GLE",
        "HR" => "HRV",
        "HU" => "HUN",
        "IT" => "ITA",
        "LT" => "LIT",
        "LV" => "LAV",
        "MT" => "MLT",
        "NL" => "NLD",
        "PL" => "POL",
        "PT" => "POR",
        "RO" => "RON",
        "SK" => "SLK",
        "SL" => "SLV",
        "SV" => "SWE",
        _ => return upper,
    };
    mapped.to_string()
}

/// Build the direct HTML URL for a CELEX ID on EUR-Lex.
///
/// # Examples
/// ```
/// use eurlex_harvester::config::{html_url, EURLEX_BASE_URL};
///
/// assert_eq!(
///     html_url(EURLEX_BASE_URL, "EN", "32019R0947"),
///     "https://eur-lex.europa.eu/legal-content/EN/TXT/HTML/?uri=CELEX:32019R0947"
/// );
/// ```
pub fn html_url(base: &str, language: &str, celex_id: &str) -> String {
    format!(
        "{}/legal-content/{}/TXT/HTML/?uri=CELEX:{celex_id}",
        base.trim_end_matches('/'),
        language.to_uppercase()
    )
}

/// Build the PDF URL for a CELEX ID on EUR-Lex.
pub fn pdf_url(base: &str, language: &str, celex_id: &str) -> String {
    format!(
        "{}/legal-content/{}/TXT/PDF/?uri=CELEX:{celex_id}",
        base.trim_end_matches('/'),
        language.to_uppercase()
    )
}

/// Build the CELLAR resource URI for a CELEX ID.
pub fn celex_resource_url(cellar_base: &str, celex_id: &str) -> String {
    format!("{}/resource/celex/{celex_id}", cellar_base.trim_end_matches('/'))
}

/// Build the CELLAR resource URI for a cellar ID.
pub fn cellar_resource_url(cellar_base: &str, cellar_id: &str) -> String {
    format!("{}/resource/cellar/{cellar_id}", cellar_base.trim_end_matches('/'))
}
