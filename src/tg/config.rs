use std::fmt;
use std::time::Duration;

use super::error::Error;
use super::error::Result;

/// Environment variable holding the bot token given by the Botfather.
pub const TOKEN_ENV_VAR: &str = "TG_BOT_TOKEN";
/// Optional override for the long-poll timeout, in seconds.
pub const POLL_TIMEOUT_ENV_VAR: &str = "TG_POLL_TIMEOUT";
/// Optional override for the HTTP client timeout, in seconds.
pub const HTTP_TIMEOUT_ENV_VAR: &str = "TG_HTTP_TIMEOUT";
/// Optional override for the API base URL (e.g. a local Bot API server).
pub const API_URL_ENV_VAR: &str = "TG_API_URL";

pub const DEFAULT_API_URL: &str = "https://api.telegram.org/";
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// How the poll loop reacts to failed `getUpdates` calls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive failures tolerated before the loop gives up.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Fail on the first error.
    pub fn none() -> RetryPolicy {
        RetryPolicy {
            max_retries: 0,
            ..RetryPolicy::default()
        }
    }

    /// Delay before retry number `attempt` (1-based): doubles from
    /// `initial_backoff` and is capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> RetryPolicy {
        RetryPolicy {
            max_retries: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// Settings shared by the client and the poll loop. Immutable once the
/// client is built.
#[derive(Clone)]
pub struct BotConfig {
    token: String,
    pub poll_timeout: Duration,
    pub http_timeout: Duration,
    pub api_url: String,
    pub retry: RetryPolicy,
}

impl BotConfig {
    pub fn new(token: impl Into<String>) -> BotConfig {
        BotConfig {
            token: token.into(),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            api_url: String::from(DEFAULT_API_URL),
            retry: RetryPolicy::default(),
        }
    }

    /// Reads the configuration from `TG_BOT_TOKEN` and the optional
    /// timeout/URL overrides.
    pub fn from_env() -> Result<BotConfig> {
        BotConfig::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<BotConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = lookup(TOKEN_ENV_VAR)
            .ok_or_else(|| Error::Config(format!("missing {} env var", TOKEN_ENV_VAR)))?;
        let mut config = BotConfig::new(token);

        if let Some(secs) = lookup(POLL_TIMEOUT_ENV_VAR) {
            config.poll_timeout = parse_secs(POLL_TIMEOUT_ENV_VAR, &secs)?;
        }
        if let Some(secs) = lookup(HTTP_TIMEOUT_ENV_VAR) {
            config.http_timeout = parse_secs(HTTP_TIMEOUT_ENV_VAR, &secs)?;
        }
        if let Some(url) = lookup(API_URL_ENV_VAR) {
            config = config.with_api_url(url);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> BotConfig {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> BotConfig {
        self.http_timeout = timeout;
        self
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> BotConfig {
        let mut url = url.into();
        if !url.ends_with('/') {
            url.push('/');
        }
        self.api_url = url;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> BotConfig {
        self.retry = retry;
        self
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Checks the invariants the client relies on. The HTTP timeout must
    /// strictly exceed the long-poll timeout, or every idle poll would end
    /// in a transport timeout.
    pub fn validate(&self) -> Result<()> {
        if self.token.trim().is_empty() {
            return Err(Error::Config(String::from("bot token is empty")));
        }
        // The API takes whole seconds; anything shorter would round down
        // to zero and turn long polling into a busy loop.
        if self.poll_timeout < Duration::from_secs(1) {
            return Err(Error::Config(format!(
                "poll timeout ({:?}) must be at least one second",
                self.poll_timeout
            )));
        }
        if self.http_timeout <= self.poll_timeout {
            return Err(Error::Config(format!(
                "http timeout ({:?}) must exceed poll timeout ({:?})",
                self.http_timeout, self.poll_timeout
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotConfig")
            .field("token", &mask_token(&self.token))
            .field("poll_timeout", &self.poll_timeout)
            .field("http_timeout", &self.http_timeout)
            .field("api_url", &self.api_url)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Masks a token for logging: first 7 + "***" + last 4 characters, or just
/// "***" when the token is too short to hide anything.
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 11 {
        return String::from("***");
    }
    let head: String = chars[..7].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}***{}", head, tail)
}

fn parse_secs(var: &str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| Error::Config(format!("{} must be whole seconds: {}", var, e)))
}
