//! The process-wide active endpoint.
//!
//! [`ActiveEndpoint`] is a cloneable handle to a single URL cell. Every clone
//! observes the same value, so the networking layer can hold one while the
//! selector rewrites it. Only the selector writes; readers may see a stale
//! value but never a torn one.

use std::sync::{Arc, PoisonError, RwLock};

use anyhow::Context;
use reqwest::Url;

#[derive(Debug, Clone)]
pub struct ActiveEndpoint {
    // The lock is held only for the duration of `Arc::clone` or a pointer swap.
    inner: Arc<RwLock<Arc<Url>>>,
}

impl ActiveEndpoint {
    pub fn new(initial: Url) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(initial))),
        }
    }

    /// Current base URL. Never blocks on probing.
    pub fn get(&self) -> Url {
        let current = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Url::clone(&current)
    }

    /// Replace the base URL, returning the previous one.
    pub(crate) fn set(&self, url: Url) -> Url {
        let mut slot = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let previous = std::mem::replace(&mut *slot, Arc::new(url));
        Url::clone(&previous)
    }

    /// Resolve an API path against the active base URL.
    ///
    /// A leading `/` is ignored so `"/api/audio"` and `"api/audio"` both land
    /// under the base path instead of replacing it.
    pub fn join(&self, path: &str) -> anyhow::Result<Url> {
        let base = self.get();
        base.join(path.trim_start_matches('/'))
            .with_context(|| format!("joining `{path}` onto {base}"))
    }

    /// Move an already-built request URL onto the active endpoint's origin.
    ///
    /// Scheme, host and port come from the active endpoint; path, query and
    /// fragment are kept. If the origin can't be applied (e.g. the request URL
    /// is not http/https) the request URL is returned unchanged.
    pub fn rebase(&self, request: &Url) -> Url {
        let base = self.get();
        let mut rebased = request.clone();

        let moved = rebased.set_scheme(base.scheme()).is_ok()
            && rebased.set_host(base.host_str()).is_ok()
            && rebased.set_port(base.port()).is_ok();

        if moved {
            rebased
        } else {
            request.clone()
        }
    }
}
