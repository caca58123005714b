//! Configuration types for scholar-endpoint.
//!
//! Config is loaded from a TOML file and validated before any probe runs.
//! Invalid configs are rejected with a clear error rather than silently
//! falling back to defaults. When no file exists at all, the built-in
//! AudioScholar candidate list is used.
//!
//! # Example
//! ```toml
//! default = "prod"
//!
//! [service]
//! admin_port = 8090
//!
//! [probe]
//! timeout_ms = 3000
//! method     = "head"
//! liveness   = "success"
//!
//! [[endpoints]]
//! name = "dev"
//! url  = "https://mastodon-balanced-randomly.ngrok-free.app/"
//!
//! [[endpoints]]
//! name = "prod"
//! url  = "https://it342-g3-audioscholar-onrender-com.onrender.com/"
//! ```

use std::{collections::HashSet, path::Path};

use anyhow::Context;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};

use crate::selector::{Candidate, CandidateSet};

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Name of the fallback endpoint used when no probe succeeds.
    ///
    /// Defaults to the last entry in `endpoints`.
    #[serde(default)]
    pub default: Option<String>,

    #[serde(default)]
    pub service: ServiceConfig,

    #[serde(default)]
    pub probe: ProbeConfig,

    /// Candidate endpoints in priority order — earlier entries win.
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config: Self = toml::from_str(&content).context("parsing config TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise return [`Config::builtin`].
    ///
    /// A file that exists but fails to parse or validate is still an error.
    pub fn load_or_builtin(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::builtin())
        }
    }

    /// The AudioScholar deployment: ngrok dev tunnel, LAN host, then production.
    pub fn builtin() -> Self {
        Self {
            default: Some("prod".into()),
            service: ServiceConfig::default(),
            probe: ProbeConfig::default(),
            endpoints: vec![
                EndpointConfig {
                    name: "dev".into(),
                    url: "https://mastodon-balanced-randomly.ngrok-free.app/".into(),
                },
                EndpointConfig {
                    name: "local".into(),
                    url: "http://192.168.137.1:8080/".into(),
                },
                EndpointConfig {
                    name: "prod".into(),
                    url: "https://it342-g3-audioscholar-onrender-com.onrender.com/".into(),
                },
            ],
        }
    }

    pub(crate) fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.endpoints.is_empty(), "at least one [[endpoints]] entry is required");
        anyhow::ensure!(self.probe.timeout_ms > 0, "probe.timeout_ms must be greater than 0");

        let mut seen = HashSet::new();
        for endpoint in &self.endpoints {
            anyhow::ensure!(!endpoint.name.trim().is_empty(), "endpoint name must not be empty");
            anyhow::ensure!(
                seen.insert(endpoint.name.as_str()),
                "duplicate endpoint name `{}`",
                endpoint.name
            );
            endpoint.parse_url()?;
        }

        if let Some(default) = &self.default {
            anyhow::ensure!(
                seen.contains(default.as_str()),
                "default references unknown endpoint `{}`",
                default
            );
        }

        Ok(())
    }

    /// Build the ordered [`CandidateSet`] described by this config.
    pub fn candidates(&self) -> anyhow::Result<CandidateSet> {
        let candidates = self
            .endpoints
            .iter()
            .map(|e| Ok(Candidate::new(e.name.clone(), e.parse_url()?)))
            .collect::<anyhow::Result<Vec<_>>>()?;

        let default_idx = match &self.default {
            Some(name) => self
                .endpoints
                .iter()
                .position(|e| &e.name == name)
                .with_context(|| format!("default references unknown endpoint `{name}`"))?,
            None => candidates.len().saturating_sub(1),
        };

        CandidateSet::new(candidates, default_idx)
    }
}

/// Settings for the sidecar process.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Port for the status/admin API (default: 8090).
    #[serde(default = "defaults::admin_port")]
    pub admin_port: u16,

    /// Log level override (also controlled by `RUST_LOG` env var).
    #[serde(default)]
    pub log_level: Option<String>,

    /// Re-run the selection every N seconds. Unset or 0 disables it.
    #[serde(default)]
    pub reselect_interval_secs: Option<u64>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            admin_port: defaults::admin_port(),
            log_level: None,
            reselect_interval_secs: None,
        }
    }
}

/// How candidates are probed.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProbeConfig {
    /// Per-probe timeout in milliseconds, applied to every candidate (default: 3000).
    #[serde(default = "defaults::timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub method: ProbeMethod,

    #[serde(default)]
    pub liveness: Liveness,

    /// Keep the first selection for the lifetime of the process.
    #[serde(default)]
    pub sticky: bool,

    /// Send `ngrok-skip-browser-warning: true` so tunnel interstitials
    /// don't answer in place of the backend (default: true).
    #[serde(default = "defaults::skip_browser_warning")]
    pub skip_browser_warning: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: defaults::timeout_ms(),
            method: ProbeMethod::default(),
            liveness: Liveness::default(),
            sticky: false,
            skip_browser_warning: defaults::skip_browser_warning(),
        }
    }
}

/// A named candidate endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
    /// Short label used in logs and reports, e.g. `dev`, `local`, `prod`.
    pub name: String,
    /// Base URL the client should use when this endpoint is selected.
    pub url: String,
}

impl EndpointConfig {
    fn parse_url(&self) -> anyhow::Result<Url> {
        let url = Url::parse(&self.url)
            .with_context(|| format!("endpoint `{}` has invalid url `{}`", self.name, self.url))?;
        anyhow::ensure!(
            matches!(url.scheme(), "http" | "https"),
            "endpoint `{}` must use http or https, got `{}`",
            self.name,
            url.scheme()
        );
        Ok(url)
    }
}

/// HTTP method used for probes.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProbeMethod {
    /// `HEAD` — no body is transferred.
    #[default]
    Head,
    /// `GET` — for servers that mishandle `HEAD`.
    Get,
}

impl std::fmt::Display for ProbeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Head => "head",
            Self::Get => "get",
        })
    }
}

/// Which response statuses count as a live endpoint.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    /// Only 2xx responses.
    #[default]
    Success,
    /// Any response proving the server answered: 2xx, 3xx, 401, 403 or 404.
    Reachable,
}

impl Liveness {
    pub fn accepts(self, status: StatusCode) -> bool {
        match self {
            Self::Success => status.is_success(),
            Self::Reachable => {
                status.is_success()
                    || status.is_redirection()
                    || matches!(
                        status,
                        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND
                    )
            }
        }
    }
}

impl std::fmt::Display for Liveness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::Reachable => "reachable",
        })
    }
}

mod defaults {
    pub fn admin_port() -> u16 { 8090 }
    pub fn timeout_ms() -> u64 { 3_000 }
    pub fn skip_browser_warning() -> bool { true }
}
