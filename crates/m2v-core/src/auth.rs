use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::api::{TokenResponse, TOKEN_ROUTE};
use crate::config::{PasswordGrant, Settings};
use crate::error::RequestError;
use crate::http_client::{HttpClient, HttpRequest};
use crate::retry::{classify_status, RetryPolicy, StatusClass};
use crate::transport::execute_once;

/// Bearer token plus the instant after which it is no longer handed out.
#[derive(Clone)]
struct Credential {
    access_token: String,
    refresh_at: Instant,
}

impl Credential {
    fn issued(access_token: String, lifetime: Duration, margin: Duration) -> Self {
        // Short-lived tokens would never be usable with the full margin.
        let margin = margin.min(lifetime / 2);
        Self {
            access_token,
            refresh_at: Instant::now() + lifetime.saturating_sub(margin),
        }
    }

    fn is_fresh(&self) -> bool {
        Instant::now() < self.refresh_at
    }
}

/// What the last finished exchange left behind.
#[derive(Default)]
struct TokenState {
    credential: Option<Credential>,
    /// Error of the last exchange, cleared by the next success.
    failure: Option<RequestError>,
}

/// Owns the client credential and performs the password-grant exchange.
///
/// The state lives behind one async mutex that stays locked for the whole
/// exchange: callers arriving while a refresh is running wait for it and
/// reuse its result, a token or an error, instead of starting their own.
pub struct TokenManager {
    http: Arc<dyn HttpClient>,
    token_url: String,
    grant: PasswordGrant,
    refresh_margin: Duration,
    request_timeout: Duration,
    retry: RetryPolicy,
    state: Mutex<TokenState>,
    /// Bumped under the lock each time an exchange cycle finishes.
    completed: AtomicU64,
    exchanges: AtomicU64,
}

impl TokenManager {
    pub fn new(settings: &Settings, http: Arc<dyn HttpClient>) -> Self {
        Self {
            http,
            token_url: settings.endpoint(TOKEN_ROUTE),
            grant: settings.grant.clone(),
            refresh_margin: settings.token_refresh_margin,
            request_timeout: settings.request_timeout,
            retry: settings.retry.clone(),
            state: Mutex::new(TokenState::default()),
            completed: AtomicU64::new(0),
            exchanges: AtomicU64::new(0),
        }
    }

    /// Returns a token valid beyond the refresh margin, exchanging credentials if needed.
    ///
    /// A caller that queued behind a failed exchange gets that failure back.
    pub async fn bearer(&self) -> Result<String, RequestError> {
        let observed = self.completed.load(Ordering::SeqCst);
        let mut state = self.state.lock().await;
        if let Some(credential) = state
            .credential
            .as_ref()
            .filter(|credential| credential.is_fresh())
        {
            return Ok(credential.access_token.clone());
        }
        if self.completed.load(Ordering::SeqCst) != observed {
            if let Some(failure) = &state.failure {
                debug!("reusing the failure of the exchange this caller waited on");
                return Err(failure.clone());
            }
        }

        let result = self.exchange().await;
        self.completed.fetch_add(1, Ordering::SeqCst);
        match result {
            Ok(credential) => {
                let token = credential.access_token.clone();
                state.credential = Some(credential);
                state.failure = None;
                Ok(token)
            }
            Err(error) => {
                state.credential = None;
                state.failure = Some(error.clone());
                Err(error)
            }
        }
    }

    /// Drops the held credential if it is still `token`.
    ///
    /// A token that was already replaced by a concurrent refresh is left alone.
    pub async fn invalidate(&self, token: &str) {
        let mut state = self.state.lock().await;
        if state
            .credential
            .as_ref()
            .is_some_and(|credential| credential.access_token == token)
        {
            debug!("discarding rejected bearer token");
            state.credential = None;
        }
    }

    /// Number of token exchanges sent so far, successful or not.
    pub fn exchange_count(&self) -> u64 {
        self.exchanges.load(Ordering::Relaxed)
    }

    async fn exchange(&self) -> Result<Credential, RequestError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            self.exchanges.fetch_add(1, Ordering::Relaxed);
            debug!(attempt = attempts, url = %self.token_url, "requesting access token");

            let request = HttpRequest::post(&self.token_url)
                .with_form_body(&[
                    ("grant_type", "password"),
                    ("username", self.grant.username.as_str()),
                    ("password", self.grant.password.as_str()),
                    ("client_id", self.grant.client_id.as_str()),
                    ("client_secret", self.grant.client_secret.as_str()),
                ])
                .with_timeout(self.request_timeout);

            let error = match execute_once(self.http.as_ref(), request).await {
                Ok(response) => match classify_status(response.status) {
                    StatusClass::Success => {
                        let token: TokenResponse =
                            serde_json::from_str(&response.body).map_err(|error| {
                                RequestError::authentication(format!(
                                    "token endpoint returned an unreadable body: {error}"
                                ))
                                .with_status(response.status)
                                .with_attempts(attempts)
                            })?;
                        info!(expires_in = token.expires_in, "access token acquired");
                        return Ok(Credential::issued(
                            token.access_token,
                            Duration::from_secs(token.expires_in),
                            self.refresh_margin,
                        ));
                    }
                    StatusClass::Transient => {
                        RequestError::transient("token endpoint temporarily unavailable")
                            .with_status(response.status)
                    }
                    StatusClass::Unauthorized | StatusClass::Permanent => {
                        warn!(status = response.status, "token exchange rejected");
                        return Err(RequestError::authentication(format!(
                            "token exchange rejected: {}",
                            response.body_preview(128)
                        ))
                        .with_status(response.status)
                        .with_attempts(attempts));
                    }
                },
                Err(error) => error,
            };

            if !self.retry.allows_retry(attempts) {
                return Err(error.with_attempts(attempts));
            }
            let delay = self.retry.delay_after(attempts);
            info!(
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                reason = %error,
                "retrying token exchange"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

impl Debug for TokenManager {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("token_url", &self.token_url)
            .field("grant", &self.grant)
            .field("exchanges", &self.exchange_count())
            .finish_non_exhaustive()
    }
}
