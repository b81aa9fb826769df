use std::num::NonZeroU32;
use std::sync::Arc;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Request-rate budget owned by one transport. Clones share the same budget.
#[derive(Clone)]
pub struct RequestThrottle {
    limiter: Arc<DirectRateLimiter>,
    per_second: NonZeroU32,
}

impl RequestThrottle {
    pub fn per_second(per_second: NonZeroU32) -> Self {
        Self {
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(per_second))),
            per_second,
        }
    }

    /// Builds a throttle from an optional setting; `None` or zero means unthrottled.
    pub fn from_setting(per_second: Option<u32>) -> Option<Self> {
        per_second.and_then(NonZeroU32::new).map(Self::per_second)
    }

    pub fn rate(&self) -> NonZeroU32 {
        self.per_second
    }

    /// Non-blocking check; `true` consumes one cell of budget.
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }

    /// Waits until one request may be sent.
    pub async fn until_ready(&self) {
        self.limiter.until_ready().await;
    }
}

impl std::fmt::Debug for RequestThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestThrottle")
            .field("per_second", &self.per_second)
            .finish()
    }
}
