//! Best-server selection for AudioScholar clients.
//!
//! [`EndpointSelector`] probes a fixed, priority-ordered list of candidate
//! base URLs in parallel and stores the first live one (or the designated
//! default) in a shared [`ActiveEndpoint`]. HTTP client layers read that cell,
//! or use [`ActiveEndpoint::rebase`], to send every request to the chosen
//! server.
//!
//! ```rust,ignore
//! let config = Config::load_or_builtin(path)?;
//! let selector = EndpointSelector::from_config(&config)?;
//! let base = selector.select_best_endpoint().await;
//! ```

pub mod active;
pub mod api;
pub mod config;
pub mod error;
pub mod history;
pub mod probe;
pub mod selector;
pub mod service;

pub use active::ActiveEndpoint;
pub use config::Config;
pub use error::AppError;
pub use probe::{HttpProbe, Probe, ProbeOutcome};
pub use selector::{Candidate, CandidateSet, EndpointSelector, Selection};
