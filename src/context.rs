use std::{
    fmt,
    sync::{Arc, OnceLock},
};

use reqwest::cookie::{CookieStore, Jar};

use crate::{ReqwestTransport, Transport};

static GLOBAL: OnceLock<Arc<ClientContext>> = OnceLock::new();

/// State shared by every [`HttpClient`](crate::HttpClient) built from it:
/// the transport and a lazily created cookie jar.
///
/// Clients that should share cookies must share a context. Tests build their
/// own context to get an isolated jar.
pub struct ClientContext {
    transport: Arc<dyn Transport>,
    cookie_jar: OnceLock<Arc<Jar>>,
    cookie_transport: OnceLock<Option<Arc<dyn Transport>>>,
}

impl fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientContext")
            .field("cookie_jar_initialized", &self.cookie_jar.get().is_some())
            .finish_non_exhaustive()
    }
}

impl ClientContext {
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self::from_arc(Arc::new(transport))
    }

    pub fn from_arc(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            cookie_jar: OnceLock::new(),
            cookie_transport: OnceLock::new(),
        }
    }

    /// Process-wide default context backed by [`ReqwestTransport`].
    pub fn global() -> Arc<ClientContext> {
        GLOBAL
            .get_or_init(|| Arc::new(Self::new(ReqwestTransport::new())))
            .clone()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Returns the context cookie jar, creating it on first use.
    ///
    /// Concurrent first calls observe the same jar.
    pub fn shared_cookie_jar(&self) -> Arc<Jar> {
        self.cookie_jar
            .get_or_init(|| {
                #[cfg(feature = "tracing")]
                tracing::debug!("creating shared cookie jar");
                Arc::new(Jar::default())
            })
            .clone()
    }

    /// Transport that keeps the shared jar current across redirects, or
    /// `None` when the context transport cannot carry a cookie store.
    pub(crate) fn shared_cookie_transport(&self) -> Option<Arc<dyn Transport>> {
        self.cookie_transport
            .get_or_init(|| {
                let jar: Arc<dyn CookieStore> = self.shared_cookie_jar();
                self.transport.with_cookie_store(jar)
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::ClientContext;
    use crate::ReqwestTransport;

    #[test]
    fn cookie_jar_is_created_once() {
        let context = ClientContext::new(ReqwestTransport::new());
        let first = context.shared_cookie_jar();
        let second = context.shared_cookie_jar();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn cookie_transport_is_built_once() {
        let context = ClientContext::new(ReqwestTransport::new());
        let first = context.shared_cookie_transport().expect("reqwest carries cookies");
        let second = context.shared_cookie_transport().expect("cached");
        assert!(Arc::ptr_eq(&first, &second));

        let fixed = ClientContext::new(ReqwestTransport::from_client(reqwest::Client::new()));
        assert!(fixed.shared_cookie_transport().is_none());
    }

    #[test]
    fn contexts_have_isolated_jars() {
        let a = ClientContext::new(ReqwestTransport::new());
        let b = ClientContext::new(ReqwestTransport::new());
        assert!(!Arc::ptr_eq(&a.shared_cookie_jar(), &b.shared_cookie_jar()));
    }

    #[test]
    fn concurrent_first_use_yields_one_jar() {
        let context = Arc::new(ClientContext::new(ReqwestTransport::new()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let context = Arc::clone(&context);
                std::thread::spawn(move || context.shared_cookie_jar())
            })
            .collect();
        let jars: Vec<_> = handles
            .into_iter()
            .map(|handle| handle.join().expect("thread must not panic"))
            .collect();
        assert!(jars.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    }
}
