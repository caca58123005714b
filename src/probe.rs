//! Liveness probes against a single candidate endpoint.
//!
//! A probe never fails from the caller's point of view: every transport error,
//! timeout or rejected status is folded into a [`ProbeOutcome`] with
//! `live = false`. The [`ProbeFailure`] kind is kept only so logs and the
//! selection report can say *why* a candidate was skipped.

use std::time::{Duration, Instant};

use anyhow::Context;
use futures_util::future::BoxFuture;
use reqwest::{header, redirect, Client, StatusCode, Url};
use serde::Serialize;
use tracing::debug;

use crate::{
    config::{Liveness, ProbeConfig, ProbeMethod},
    selector::Candidate,
};

/// Header that makes ngrok skip its browser interstitial page.
pub const NGROK_SKIP_WARNING: &str = "ngrok-skip-browser-warning";

/// Something that can decide whether a candidate endpoint is live.
///
/// [`HttpProbe`] is the production implementation; the selector only sees
/// this trait so the decision procedure can be exercised without a network.
pub trait Probe: Send + Sync {
    fn probe<'a>(&'a self, candidate: &'a Candidate) -> BoxFuture<'a, ProbeOutcome>;
}

/// Why a probe did not count as live.
#[derive(Debug, thiserror::Error)]
pub enum ProbeFailure {
    #[error("no response within {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connect(#[source] reqwest::Error),
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("endpoint answered HTTP {0}")]
    Status(StatusCode),
}

impl ProbeFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Timeout(_) => FailureKind::Timeout,
            Self::Connect(_) => FailureKind::Connect,
            Self::Request(_) => FailureKind::Request,
            Self::Status(_) => FailureKind::Status,
        }
    }

    fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status(code) => Some(*code),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ProbeFailure {
    fn from(e: reqwest::Error) -> Self {
        // A connect timeout reports both flags; count it as a timeout.
        if e.is_timeout() {
            Self::Timeout(Duration::ZERO)
        } else if e.is_connect() {
            Self::Connect(e)
        } else {
            Self::Request(e)
        }
    }
}

/// Coarse failure category reported alongside a dead probe.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Connect,
    Request,
    Status,
}

/// Result of probing one candidate.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeOutcome {
    pub candidate: String,
    pub url: String,
    pub live: bool,
    pub status: Option<u16>,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProbeOutcome {
    pub fn live(candidate: &Candidate, status: StatusCode, latency: Duration) -> Self {
        Self {
            candidate: candidate.name.clone(),
            url: candidate.url.to_string(),
            live: true,
            status: Some(status.as_u16()),
            latency_ms: latency.as_millis() as u64,
            failure: None,
            error: None,
        }
    }

    pub fn failed(candidate: &Candidate, failure: &ProbeFailure, latency: Duration) -> Self {
        Self {
            candidate: candidate.name.clone(),
            url: candidate.url.to_string(),
            live: false,
            status: failure.status().map(|s| s.as_u16()),
            latency_ms: latency.as_millis() as u64,
            failure: Some(failure.kind()),
            error: Some(failure.to_string()),
        }
    }
}

/// Probes candidates over HTTP with a shared [`reqwest::Client`].
///
/// Redirects are never followed so a `3xx` is judged by the [`Liveness`]
/// policy instead of by whatever the redirect target answers.
pub struct HttpProbe {
    client: Client,
    method: ProbeMethod,
    liveness: Liveness,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(cfg: &ProbeConfig) -> anyhow::Result<Self> {
        let mut headers = header::HeaderMap::new();
        if cfg.skip_browser_warning {
            headers.insert(NGROK_SKIP_WARNING, header::HeaderValue::from_static("true"));
        }

        let timeout = Duration::from_millis(cfg.timeout_ms);
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .connect_timeout(timeout)
            .redirect(redirect::Policy::none())
            .build()
            .context("building reqwest client")?;

        Ok(Self {
            client,
            method: cfg.method,
            liveness: cfg.liveness,
            timeout,
        })
    }

    /// Send one request to `url` and judge the status code.
    ///
    /// # Errors
    /// Returns the [`ProbeFailure`] explaining why the endpoint is not live.
    pub async fn check(&self, url: &Url) -> Result<StatusCode, ProbeFailure> {
        let request = match self.method {
            ProbeMethod::Head => self.client.head(url.clone()),
            ProbeMethod::Get => self.client.get(url.clone()),
        };

        let status = match request.send().await {
            Ok(response) => response.status(),
            Err(e) => {
                return Err(match ProbeFailure::from(e) {
                    ProbeFailure::Timeout(_) => ProbeFailure::Timeout(self.timeout),
                    other => other,
                })
            }
        };

        if self.liveness.accepts(status) {
            Ok(status)
        } else {
            Err(ProbeFailure::Status(status))
        }
    }
}

impl Probe for HttpProbe {
    fn probe<'a>(&'a self, candidate: &'a Candidate) -> BoxFuture<'a, ProbeOutcome> {
        Box::pin(async move {
            let t0 = Instant::now();
            let result = self.check(&candidate.url).await;
            let latency = t0.elapsed();

            match result {
                Ok(status) => {
                    debug!(
                        candidate = %candidate.name,
                        url = %candidate.url,
                        status = status.as_u16(),
                        latency_ms = latency.as_millis() as u64,
                        "probe live"
                    );
                    ProbeOutcome::live(candidate, status, latency)
                }
                Err(failure) => {
                    debug!(
                        candidate = %candidate.name,
                        url = %candidate.url,
                        error = %failure,
                        latency_ms = latency.as_millis() as u64,
                        "probe failed"
                    );
                    ProbeOutcome::failed(candidate, &failure, latency)
                }
            }
        })
    }
}
