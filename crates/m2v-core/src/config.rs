//! Client settings.
//!
//! The fetch core only ever receives a [`Settings`] value. Reading the
//! process environment happens here, for callers such as the CLI.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default |
//! |----------|----------|---------|
//! | `EUROGARD_BASE_URL` | yes | - |
//! | `EUROGARD_USERNAME` | yes | - |
//! | `EUROGARD_PASSWORD` | yes | - |
//! | `EUROGARD_CLIENT_ID` | yes | - |
//! | `EUROGARD_CLIENT_SECRET` | yes | - |
//! | `EUROGARD_TIMEOUT_SECS` | no | `30` |
//! | `EUROGARD_MAX_CONCURRENCY` | no | `4` |
//! | `EUROGARD_MAX_BATCH_SPAN` | no | `1D` |
//! | `EUROGARD_REQUESTS_PER_SECOND` | no | unlimited |

use std::fmt::{Debug, Formatter};
use std::num::NonZeroUsize;
use std::time::Duration;

use crate::domain::parse_span;
use crate::retry::RetryPolicy;
use crate::ValidationError;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_CONCURRENCY: NonZeroUsize = match NonZeroUsize::new(4) {
    Some(value) => value,
    None => unreachable!(),
};
pub const DEFAULT_MAX_BATCH_SPAN: time::Duration = time::Duration::days(1);
pub const DEFAULT_TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(30);

const ENV_PREFIX: &str = "EUROGARD_";

/// Resource-owner credentials exchanged for a bearer token.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordGrant {
    pub username: String,
    pub password: String,
    pub client_id: String,
    pub client_secret: String,
}

impl Debug for PasswordGrant {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordGrant")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Everything a client needs; constructed once and passed in.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub base_url: String,
    pub grant: PasswordGrant,
    /// Upper bound for one HTTP exchange.
    pub request_timeout: Duration,
    /// Client-wide cap on in-flight batch requests.
    pub max_concurrency: NonZeroUsize,
    pub max_batch_span: time::Duration,
    /// A token is refreshed once it is this close to expiry.
    pub token_refresh_margin: Duration,
    pub retry: RetryPolicy,
    pub requests_per_second: Option<u32>,
}

impl Settings {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            base_url: normalize_base_url(base_url.into()),
            grant: PasswordGrant {
                username: username.into(),
                password: password.into(),
                client_id: client_id.into(),
                client_secret: client_secret.into(),
            },
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_batch_span: DEFAULT_MAX_BATCH_SPAN,
            token_refresh_margin: DEFAULT_TOKEN_REFRESH_MARGIN,
            retry: RetryPolicy::default(),
            requests_per_second: None,
        }
    }

    /// Reads `EUROGARD_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ValidationError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`Settings::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |suffix: &'static str| -> Option<String> {
            lookup(&format!("{ENV_PREFIX}{suffix}"))
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };
        let require = |suffix: &'static str, name: &'static str| {
            read(suffix).ok_or(ValidationError::MissingSetting { name })
        };

        let mut settings = Self::new(
            require("BASE_URL", "base_url")?,
            require("USERNAME", "username")?,
            require("PASSWORD", "password")?,
            require("CLIENT_ID", "client_id")?,
            require("CLIENT_SECRET", "client_secret")?,
        );

        if let Some(value) = read("TIMEOUT_SECS") {
            let seconds: u64 = value
                .parse()
                .ok()
                .filter(|seconds| *seconds > 0)
                .ok_or_else(|| ValidationError::InvalidSetting {
                    name: "timeout_secs",
                    value: value.clone(),
                })?;
            settings.request_timeout = Duration::from_secs(seconds);
        }

        if let Some(value) = read("MAX_CONCURRENCY") {
            settings.max_concurrency = value
                .parse::<usize>()
                .ok()
                .and_then(NonZeroUsize::new)
                .ok_or_else(|| ValidationError::InvalidSetting {
                    name: "max_concurrency",
                    value: value.clone(),
                })?;
        }

        if let Some(value) = read("MAX_BATCH_SPAN") {
            settings.max_batch_span = parse_span(&value)?;
        }

        if let Some(value) = read("REQUESTS_PER_SECOND") {
            let rate: u32 = value.parse().map_err(|_| ValidationError::InvalidSetting {
                name: "requests_per_second",
                value: value.clone(),
            })?;
            settings.requests_per_second = Some(rate);
        }

        Ok(settings)
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: NonZeroUsize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_max_batch_span(mut self, span: time::Duration) -> Self {
        self.max_batch_span = span;
        self
    }

    pub fn with_token_refresh_margin(mut self, margin: Duration) -> Self {
        self.token_refresh_margin = margin;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_requests_per_second(mut self, rate: u32) -> Self {
        self.requests_per_second = Some(rate);
        self
    }

    pub fn endpoint(&self, route: &str) -> String {
        format!("{}{route}", self.base_url)
    }
}

fn normalize_base_url(url: String) -> String {
    url.trim().trim_end_matches('/').to_owned()
}
