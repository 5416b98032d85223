use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use shiftbot_core::config::ProfileConfig;
use shiftbot_core::domain::profile::{LineUserId, Profile};

use crate::client::{LineApiError, MessagingApi};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Linear backoff: the wait after attempt `n` is `n * base_delay`.
    pub base_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(2_000),
            attempt_timeout: Duration::from_millis(8_000),
        }
    }
}

impl From<&ProfileConfig> for RetryPolicy {
    fn from(config: &ProfileConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            attempt_timeout: Duration::from_millis(config.attempt_timeout_ms),
        }
    }
}

impl RetryPolicy {
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

#[derive(Debug, Error)]
#[error("profile for {user_id} unavailable after {attempts} attempt(s): {last_error}")]
pub struct ProfileUnavailable {
    pub user_id: LineUserId,
    pub attempts: u32,
    pub last_error: LineApiError,
}

pub struct ProfileFetcher {
    api: Arc<dyn MessagingApi>,
    policy: RetryPolicy,
    fallback_display_name: String,
}

impl ProfileFetcher {
    pub fn new(
        api: Arc<dyn MessagingApi>,
        policy: RetryPolicy,
        fallback_display_name: impl Into<String>,
    ) -> Self {
        Self { api, policy, fallback_display_name: fallback_display_name.into() }
    }

    pub fn from_config(api: Arc<dyn MessagingApi>, config: &ProfileConfig) -> Self {
        Self::new(api, RetryPolicy::from(config), config.fallback_display_name.clone())
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Each attempt is cancelled when it outlives `attempt_timeout`. Errors that
    /// cannot change on retry, such as a 404, end the loop early.
    pub async fn fetch_profile(&self, user_id: &LineUserId) -> Result<Profile, ProfileUnavailable> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let outcome =
                match tokio::time::timeout(self.policy.attempt_timeout, self.api.get_profile(user_id))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(LineApiError::Timeout { endpoint: "GET /v2/bot/profile".into() }),
                };

            let error = match outcome {
                Ok(profile) => {
                    debug!(user_id = %user_id, attempt, "profile fetched");
                    return Ok(profile);
                }
                Err(error) => error,
            };

            warn!(
                user_id = %user_id,
                attempt,
                max_attempts,
                error = %error,
                "profile fetch attempt failed"
            );

            if attempt >= max_attempts || !error.is_retryable() {
                return Err(ProfileUnavailable {
                    user_id: user_id.clone(),
                    attempts: attempt,
                    last_error: error,
                });
            }
            tokio::time::sleep(self.policy.delay_after(attempt)).await;
        }
    }

    /// Never fails: exhaustion yields the placeholder display name.
    pub async fn fetch_profile_or_fallback(&self, user_id: &LineUserId) -> Profile {
        match self.fetch_profile(user_id).await {
            Ok(profile) => profile,
            Err(error) => {
                warn!(
                    user_id = %user_id,
                    attempts = error.attempts,
                    error = %error,
                    fallback = %self.fallback_display_name,
                    "using fallback profile"
                );
                Profile::fallback(user_id.clone(), self.fallback_display_name.clone())
            }
        }
    }
}
