use std::time::Duration;

/// How many times a failed transport call is repeated.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryPolicy {
    /// Retries after the initial attempt; `Bounded(0)` runs exactly once.
    Bounded(u32),
    /// Keeps retrying until the transport succeeds or the call is cancelled.
    Unbounded,
}

impl RetryPolicy {
    /// Returns `true` when attempt number `attempt` (zero-based) may run.
    pub(crate) fn allows(self, attempt: u32) -> bool {
        match self {
            Self::Bounded(retries) => attempt <= retries,
            Self::Unbounded => true,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::Bounded(0)
    }
}

impl From<u32> for RetryPolicy {
    fn from(retries: u32) -> Self {
        Self::Bounded(retries)
    }
}

/// Per-request execution behavior.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ClientOptions {
    /// Retry budget for transport errors.
    pub retry: RetryPolicy,
    /// Pause between two attempts.
    pub retry_delay: Duration,
    /// Decode `Content-Encoding: gzip` response bodies.
    pub gzip: bool,
    /// Injected as `User-Agent` unless the header was set explicitly.
    pub user_agent: Option<String>,
    /// Use the context's shared cookie jar.
    pub enable_cookies: bool,
}

/// Connection settings for [`ReqwestTransport`](crate::ReqwestTransport).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransportOptions {
    pub connect_timeout: Duration,
    pub tcp_keepalive: Option<Duration>,
    pub max_idle_per_host: usize,
    pub idle_timeout: Option<Duration>,
    /// Whole-request timeout, including reading the response head.
    pub request_timeout: Option<Duration>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            tcp_keepalive: Some(Duration::from_secs(45)),
            max_idle_per_host: 10_000,
            idle_timeout: Some(Duration::from_secs(60)),
            request_timeout: None,
        }
    }
}

impl TransportOptions {
    /// Starts from [`TransportOptions::default`] and applies overrides from
    /// the environment.
    ///
    /// Reads:
    /// - `FLUENT_HTTP_CONNECT_TIMEOUT_MS`
    /// - `FLUENT_HTTP_REQUEST_TIMEOUT_MS`
    ///
    /// Unset variables keep their defaults; malformed values are an error.
    pub fn from_env() -> std::result::Result<Self, String> {
        let mut options = Self::default();
        if let Some(ms) = read_millis("FLUENT_HTTP_CONNECT_TIMEOUT_MS")? {
            options.connect_timeout = ms;
        }
        if let Some(ms) = read_millis("FLUENT_HTTP_REQUEST_TIMEOUT_MS")? {
            options.request_timeout = Some(ms);
        }
        Ok(options)
    }
}

fn read_millis(name: &str) -> std::result::Result<Option<Duration>, String> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|err| format!("{name} must be a number of milliseconds: {err}")),
        Err(_) => Ok(None),
    }
}
