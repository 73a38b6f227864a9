use std::{fmt, sync::Arc};

use async_trait::async_trait;
use reqwest::{cookie::CookieStore, header::HeaderValue, Url};

use crate::{HttpError, Result, TransportOptions};

/// Boxed error produced by a [`Transport`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Sends one fully built request over the network.
///
/// Implementations report network-level failures only; any HTTP status,
/// including 4xx and 5xx, is a successful send.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: reqwest::Request,
    ) -> std::result::Result<reqwest::Response, BoxError>;

    /// Returns a transport that reads and updates `store` on every hop,
    /// redirects included.
    ///
    /// `None` means the caller applies `store` around [`Transport::send`]
    /// itself, which only sees the final hop.
    fn with_cookie_store(&self, _store: Arc<dyn CookieStore>) -> Option<Arc<dyn Transport>> {
        None
    }
}

/// How the wrapped client was built, so a cookie-aware twin can be built the
/// same way.
#[derive(Clone, Debug, Default)]
enum Origin {
    #[default]
    Defaults,
    Options(TransportOptions),
    Caller,
}

/// [`Transport`] backed by a `reqwest::Client`.
#[derive(Clone, Default)]
pub struct ReqwestTransport {
    http: reqwest::Client,
    origin: Origin,
}

impl fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the underlying client from connection settings.
    pub fn with_options(options: TransportOptions) -> Result<Self> {
        let http = configured(&options).build().map_err(HttpError::from)?;
        Ok(Self {
            http,
            origin: Origin::Options(options),
        })
    }

    /// Wraps a client configured by the caller.
    ///
    /// Such a transport cannot be rebuilt around a cookie store, so cookies
    /// are only applied to the final hop of a redirect chain.
    pub fn from_client(http: reqwest::Client) -> Self {
        Self {
            http,
            origin: Origin::Caller,
        }
    }
}

fn configured(options: &TransportOptions) -> reqwest::ClientBuilder {
    let builder = reqwest::Client::builder()
        .connect_timeout(options.connect_timeout)
        .tcp_keepalive(options.tcp_keepalive)
        .pool_max_idle_per_host(options.max_idle_per_host)
        .pool_idle_timeout(options.idle_timeout);
    match options.request_timeout {
        Some(timeout) => builder.timeout(timeout),
        None => builder,
    }
}

/// Hands a shared `dyn CookieStore` to reqwest, whose provider must be sized.
struct SharedStore(Arc<dyn CookieStore>);

impl CookieStore for SharedStore {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        self.0.set_cookies(cookie_headers, url);
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.0.cookies(url)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: reqwest::Request,
    ) -> std::result::Result<reqwest::Response, BoxError> {
        self.http.execute(request).await.map_err(BoxError::from)
    }

    fn with_cookie_store(&self, store: Arc<dyn CookieStore>) -> Option<Arc<dyn Transport>> {
        let builder = match &self.origin {
            Origin::Defaults => reqwest::Client::builder(),
            Origin::Options(options) => configured(options),
            Origin::Caller => return None,
        };
        match builder.cookie_provider(Arc::new(SharedStore(store))).build() {
            Ok(http) => Some(Arc::new(Self {
                http,
                origin: Origin::Caller,
            })),
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %_err, "cookie-aware client could not be built");
                None
            }
        }
    }
}
