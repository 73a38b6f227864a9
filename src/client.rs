use std::{
    fmt,
    future::{pending, Future},
    path::Path,
    sync::Arc,
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use reqwest::{
    cookie::CookieStore,
    header::{self, HeaderMap, HeaderName, HeaderValue},
    Method,
};
use serde::{de::DeserializeOwned, Serialize};
use tokio::{
    io::AsyncWriteExt,
    time::{sleep, sleep_until, Instant},
};
use tokio_util::sync::CancellationToken;

use crate::{
    body::{self, BodySource},
    response::{decode_json, decode_xml, gunzip},
    Attachments, ClientContext, ClientOptions, HttpError, Params, ResponseHead, Result,
    RetryPolicy, Transport,
};

/// Builds a GET client on the process-wide [`ClientContext`].
pub fn get(url: impl Into<String>) -> HttpClient {
    HttpClient::get(ClientContext::global(), url)
}

/// Builds a POST client on the process-wide [`ClientContext`] carrying
/// `params` as form fields.
pub fn post<I, K, V>(url: impl Into<String>, params: I) -> HttpClient
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    HttpClient::post(ClientContext::global(), url).params(params)
}

/// Single-use HTTP request builder and executor.
///
/// Configuration methods consume and return the builder. The first response
/// accessor executes the request; the response head and body are cached, so
/// later accessor calls never hit the network again.
pub struct HttpClient {
    context: Arc<ClientContext>,
    url: String,
    method: Method,
    headers: HeaderMap,
    params: Params,
    files: Attachments,
    body: BodySource,
    options: ClientOptions,
    cookie_store: Option<Arc<dyn CookieStore>>,
    cancel: Option<CancellationToken>,
    deadline: Option<Duration>,
    deadline_at: Option<Instant>,
    head: Option<ResponseHead>,
    pending: Option<reqwest::Response>,
    body_cache: Option<Bytes>,
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("params", &self.params.len())
            .field("files", &self.files.len())
            .field("body", &self.body.describe())
            .field("options", &self.options)
            .field("executed", &self.head.is_some())
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    pub fn new(context: Arc<ClientContext>, url: impl Into<String>, method: Method) -> Self {
        Self {
            context,
            url: url.into(),
            method,
            headers: HeaderMap::new(),
            params: Params::new(),
            files: Attachments::new(),
            body: BodySource::Unset,
            options: ClientOptions::default(),
            cookie_store: None,
            cancel: None,
            deadline: None,
            deadline_at: None,
            head: None,
            pending: None,
            body_cache: None,
        }
    }

    pub fn get(context: Arc<ClientContext>, url: impl Into<String>) -> Self {
        Self::new(context, url, Method::GET)
    }

    pub fn post(context: Arc<ClientContext>, url: impl Into<String>) -> Self {
        Self::new(context, url, Method::POST)
    }

    pub fn put(context: Arc<ClientContext>, url: impl Into<String>) -> Self {
        Self::new(context, url, Method::PUT)
    }

    pub fn patch(context: Arc<ClientContext>, url: impl Into<String>) -> Self {
        Self::new(context, url, Method::PATCH)
    }

    pub fn delete(context: Arc<ClientContext>, url: impl Into<String>) -> Self {
        Self::new(context, url, Method::DELETE)
    }

    /// Creates a client with its own context around `transport`.
    pub fn with_transport(
        transport: impl Transport + 'static,
        url: impl Into<String>,
        method: Method,
    ) -> Self {
        Self::new(Arc::new(ClientContext::new(transport)), url, method)
    }

    /// Replaces all execution options at once.
    pub fn with_options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Enables decoding of gzip-encoded response bodies.
    pub fn gzip(mut self, enabled: bool) -> Self {
        self.options.gzip = enabled;
        self
    }

    /// Uses `store` for cookies, taking precedence over the shared jar.
    pub fn cookie_store(mut self, store: Arc<dyn CookieStore>) -> Self {
        self.cookie_store = Some(store);
        self
    }

    /// Uses the context's shared cookie jar.
    pub fn enable_cookies(mut self, enabled: bool) -> Self {
        self.options.enable_cookies = enabled;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.options.user_agent = Some(user_agent.into());
        self
    }

    /// Sets the retry budget for transport errors and the pause between
    /// attempts.
    pub fn retries(mut self, retry: impl Into<RetryPolicy>, delay: Duration) -> Self {
        self.options.retry = retry.into();
        self.options.retry_delay = delay;
        self
    }

    /// Aborts the in-flight call and any retry pause once `token` fires.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Bounds the whole call, retries and body read included.
    pub fn deadline(mut self, budget: Duration) -> Self {
        self.deadline = Some(budget);
        self
    }

    /// Sets a header, replacing any previous value.
    ///
    /// Invalid names or values are skipped.
    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.insert_header(name.as_ref(), value.as_ref());
        self
    }

    /// Merges `headers` into the current set.
    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in headers {
            self.insert_header(name.as_ref(), value.as_ref());
        }
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.add(key, value);
        self
    }

    pub fn params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.params.extend(params);
        self
    }

    /// Uploads the file at `path` as form field `field`.
    pub fn file(mut self, field: impl Into<String>, path: impl AsRef<Path>) -> Self {
        self.files.insert(field, path.as_ref());
        self
    }

    /// Content type of every attachment part.
    pub fn file_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.files.set_content_type(content_type);
        self
    }

    /// Sends `body` verbatim.
    ///
    /// Ignored when a body was already set.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        if self.body_is_taken("raw") {
            return self;
        }
        self.body = BodySource::Raw(body.into());
        self
    }

    /// Sends `value` as `application/json`.
    ///
    /// Ignored when a body was already set.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self> {
        if self.body_is_taken("json") {
            return Ok(self);
        }
        let encoded = serde_json::to_vec(value)
            .map_err(|err| HttpError::Encode(format!("JSON body: {err}")))?;
        self.body = BodySource::Json(Bytes::from(encoded));
        Ok(self)
    }

    /// Sends `value` as `application/xml`, rooted at the type name.
    ///
    /// Ignored when a body was already set.
    pub fn xml<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self> {
        if self.body_is_taken("xml") {
            return Ok(self);
        }
        let encoded = quick_xml::se::to_string(value)
            .map_err(|err| HttpError::Encode(format!("XML body: {err}")))?;
        self.body = BodySource::Xml(Bytes::from(encoded));
        Ok(self)
    }

    /// Returns the response head, executing the request on first use.
    pub async fn response(&mut self) -> Result<&ResponseHead> {
        let head = match self.head.take() {
            Some(head) => head,
            None => {
                self.deadline_at = self.deadline.map(|budget| Instant::now() + budget);
                let response = self.execute().await?;
                let head = ResponseHead::new(&response);
                self.pending = Some(response);
                head
            }
        };
        let head: &ResponseHead = self.head.insert(head);
        Ok(head)
    }

    /// Hands out the underlying response with its unread body.
    pub async fn into_response(mut self) -> Result<reqwest::Response> {
        self.response().await?;
        self.pending.take().ok_or(HttpError::BodyConsumed)
    }

    /// Returns the response body, reading it on first use.
    pub async fn bytes(&mut self) -> Result<Bytes> {
        if let Some(body) = &self.body_cache {
            return Ok(body.clone());
        }
        let gzip = self.wants_gunzip().await?;
        let response = self.pending.take().ok_or(HttpError::BodyConsumed)?;
        let raw = guard(self.cancel.as_ref(), self.deadline_at, response.bytes()).await??;
        let body = if gzip { gunzip(&raw)? } else { raw };
        self.body_cache = Some(body.clone());
        Ok(body)
    }

    /// Body as text; invalid UTF-8 is replaced.
    pub async fn text(&mut self) -> Result<String> {
        let body = self.bytes().await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    pub async fn to_json<T: DeserializeOwned>(&mut self) -> Result<T> {
        let body = self.bytes().await?;
        decode_json(&body)
    }

    pub async fn to_xml<T: DeserializeOwned>(&mut self) -> Result<T> {
        let body = self.bytes().await?;
        decode_xml(&body)
    }

    /// Writes the body to `path`, creating missing parent directories.
    ///
    /// The body is cached along the way, so [`HttpClient::bytes`] afterwards
    /// returns the same content without another read.
    pub async fn to_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let gzip = self.wants_gunzip().await?;
        create_parent_dirs(path).await?;

        if self.body_cache.is_none() && !gzip {
            return self.stream_to_file(path).await;
        }
        let body = self.bytes().await?;
        tokio::fs::write(path, &body)
            .await
            .map_err(|err| HttpError::file(path, err))
    }

    async fn stream_to_file(&mut self, path: &Path) -> Result<()> {
        let mut response = self.pending.take().ok_or(HttpError::BodyConsumed)?;
        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|err| HttpError::file(path, err))?;
        let mut body = BytesMut::new();

        while let Some(chunk) =
            guard(self.cancel.as_ref(), self.deadline_at, response.chunk()).await??
        {
            file.write_all(&chunk)
                .await
                .map_err(|err| HttpError::file(path, err))?;
            body.extend_from_slice(&chunk);
        }
        file.flush().await.map_err(|err| HttpError::file(path, err))?;

        self.body_cache = Some(body.freeze());
        Ok(())
    }

    /// Executes the request if needed and reports whether the body must be
    /// gunzipped.
    async fn wants_gunzip(&mut self) -> Result<bool> {
        let encoded = self.response().await?.is_gzip();
        Ok(self.options.gzip && encoded)
    }

    /// Runs the retry loop once and returns the first successful response.
    async fn execute(&self) -> Result<reqwest::Response> {
        let prepared = body::prepare(
            &self.method,
            &self.url,
            self.outgoing_headers()?,
            &self.params,
            &self.files,
            &self.body,
        )?;
        let (transport, cookies) = self.route();

        let mut attempt = 0u32;
        loop {
            let (mut request, producer) = prepared.build_request()?;
            if let Some(jar) = &cookies {
                attach_cookies(jar.as_ref(), &mut request);
            }

            let outcome = guard(
                self.cancel.as_ref(),
                self.deadline_at,
                transport.send(request),
            )
            .await?;

            if let Some(err) = producer.and_then(|slot| slot.take()) {
                return Err(err);
            }

            match outcome {
                Ok(response) => {
                    if let Some(jar) = &cookies {
                        store_cookies(jar.as_ref(), &response);
                    }
                    return Ok(response);
                }
                Err(err) => {
                    let next = attempt.saturating_add(1);
                    if !self.options.retry.allows(next) {
                        return Err(HttpError::Transport(err));
                    }
                    #[cfg(feature = "tracing")]
                    tracing::debug!(attempt = next, error = %err, "transport error, retrying");
                    self.wait_before_retry().await?;
                    attempt = next;
                }
            }
        }
    }

    /// Sleeps for the configured retry delay; cancellation cuts it short.
    async fn wait_before_retry(&self) -> Result<()> {
        let delay = self.options.retry_delay;

        #[cfg(feature = "tracing")]
        tracing::debug!("retrying request after {} ms", delay.as_millis());

        guard(self.cancel.as_ref(), self.deadline_at, sleep(delay)).await
    }

    fn outgoing_headers(&self) -> Result<HeaderMap> {
        let mut headers = self.headers.clone();
        if let Some(user_agent) = &self.options.user_agent {
            if !headers.contains_key(header::USER_AGENT) {
                let value = HeaderValue::from_str(user_agent).map_err(|err| {
                    HttpError::Encode(format!("invalid user agent '{user_agent}': {err}"))
                })?;
                headers.insert(header::USER_AGENT, value);
            }
        }
        Ok(headers)
    }

    /// Picks the transport for this call. The cookie store, if any, is
    /// handed to the transport so redirects see it too; when the transport
    /// cannot take it, it is returned for the executor to apply.
    fn route(&self) -> (Arc<dyn Transport>, Option<Arc<dyn CookieStore>>) {
        let base = self.context.transport();
        let (store, carrier) = if let Some(store) = &self.cookie_store {
            (Arc::clone(store), base.with_cookie_store(Arc::clone(store)))
        } else if self.options.enable_cookies {
            let jar: Arc<dyn CookieStore> = self.context.shared_cookie_jar();
            (jar, self.context.shared_cookie_transport())
        } else {
            return (Arc::clone(base), None);
        };
        match carrier {
            Some(transport) => (transport, None),
            None => (Arc::clone(base), Some(store)),
        }
    }

    fn insert_header(&mut self, name: &str, value: &str) {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => {
                #[cfg(feature = "tracing")]
                tracing::warn!(header = name, "skipping invalid header");
            }
        }
    }

    fn body_is_taken(&self, _requested: &str) -> bool {
        if !self.body.is_set() {
            return false;
        }
        #[cfg(feature = "tracing")]
        tracing::warn!(
            current = self.body.describe(),
            requested = _requested,
            "request body already set, ignoring"
        );
        true
    }
}

fn attach_cookies(jar: &dyn CookieStore, request: &mut reqwest::Request) {
    if request.headers().contains_key(header::COOKIE) {
        return;
    }
    if let Some(value) = jar.cookies(request.url()) {
        request.headers_mut().insert(header::COOKIE, value);
    }
}

fn store_cookies(jar: &dyn CookieStore, response: &reqwest::Response) {
    let mut set_cookies = response.headers().get_all(header::SET_COOKIE).iter();
    jar.set_cookies(&mut set_cookies, response.url());
}

async fn create_parent_dirs(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => tokio::fs::create_dir_all(parent)
            .await
            .map_err(|err| HttpError::file(parent, err)),
        _ => Ok(()),
    }
}

/// Drives `future` unless the token fires or the deadline passes first.
async fn guard<F: Future>(
    cancel: Option<&CancellationToken>,
    deadline: Option<Instant>,
    future: F,
) -> Result<F::Output> {
    let cancelled = async {
        match cancel {
            Some(token) => token.cancelled().await,
            None => pending().await,
        }
    };
    let expired = async {
        match deadline {
            Some(at) => sleep_until(at).await,
            None => pending().await,
        }
    };

    tokio::select! {
        output = future => Ok(output),
        _ = cancelled => Err(HttpError::Cancelled),
        _ = expired => Err(HttpError::Cancelled),
    }
}
