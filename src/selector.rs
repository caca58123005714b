//! Best-endpoint selection — the core of scholar-endpoint.
//!
//! Every candidate is probed concurrently and the selector waits for all of
//! them (await-all, no early cancellation). The winner is then chosen by
//! **declaration order**, not by which probe answered first: the first live
//! candidate wins, and when nothing is live the designated default is used.
//! Concurrency only bounds total latency to roughly the slowest single probe.
//!
//! The chosen URL is written to the shared [`ActiveEndpoint`] exactly once per
//! selection, after the join. Selections are serialized by an async mutex so
//! two concurrent calls never interleave their writes.

use std::{
    sync::{Arc, PoisonError, RwLock},
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use reqwest::Url;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    active::ActiveEndpoint,
    config::{Config, ProbeConfig},
    history::ProbeHistory,
    probe::{HttpProbe, Probe, ProbeFailure, ProbeOutcome},
};

/// One server the client might talk to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub name: String,
    pub url: Url,
}

impl Candidate {
    pub fn new(name: impl Into<String>, url: Url) -> Self {
        Self {
            name: name.into(),
            url,
        }
    }
}

/// Non-empty, priority-ordered list of candidates plus the fallback index.
#[derive(Debug, Clone)]
pub struct CandidateSet {
    candidates: Vec<Candidate>,
    default_idx: usize,
}

impl CandidateSet {
    pub fn new(candidates: Vec<Candidate>, default_idx: usize) -> anyhow::Result<Self> {
        anyhow::ensure!(!candidates.is_empty(), "candidate set must not be empty");
        anyhow::ensure!(
            default_idx < candidates.len(),
            "default index {} out of range for {} candidates",
            default_idx,
            candidates.len()
        );
        Ok(Self {
            candidates,
            default_idx,
        })
    }

    /// Candidates in priority order with the last one as the default.
    pub fn with_last_as_default(candidates: Vec<Candidate>) -> anyhow::Result<Self> {
        let default_idx = candidates.len().saturating_sub(1);
        Self::new(candidates, default_idx)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Candidate> {
        self.candidates.iter()
    }

    pub fn as_slice(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn default_index(&self) -> usize {
        self.default_idx
    }

    pub fn default_candidate(&self) -> &Candidate {
        &self.candidates[self.default_idx]
    }
}

/// Report of one selection run.
#[derive(Debug, Clone, Serialize)]
pub struct Selection {
    pub id: Uuid,
    pub selected_at: DateTime<Utc>,
    /// Name of the chosen candidate.
    pub chosen: String,
    pub url: String,
    /// True when no candidate was live and the default was used.
    pub fallback: bool,
    pub elapsed_ms: u64,
    /// One outcome per candidate, in priority order.
    pub outcomes: Vec<ProbeOutcome>,
}

/// Pick the first live index in priority order, else `default_idx`.
///
/// Returns the index and whether the fallback was taken.
pub fn choose(live: &[bool], default_idx: usize) -> (usize, bool) {
    match live.iter().position(|&l| l) {
        Some(idx) => (idx, false),
        None => (default_idx, true),
    }
}

/// Everything a selection run needs, swapped as a unit on reconfigure.
struct Plan {
    candidates: CandidateSet,
    probe: Arc<dyn Probe>,
    timeout: Duration,
    sticky: bool,
}

pub struct EndpointSelector {
    plan: RwLock<Arc<Plan>>,
    active: ActiveEndpoint,
    history: ProbeHistory,
    last: RwLock<Option<Arc<Selection>>>,
    select_lock: tokio::sync::Mutex<()>,
}

impl EndpointSelector {
    /// Build a selector whose active endpoint starts at the default candidate.
    pub fn new(candidates: CandidateSet, probe: Arc<dyn Probe>, settings: &ProbeConfig) -> Self {
        let active = ActiveEndpoint::new(candidates.default_candidate().url.clone());
        Self {
            plan: RwLock::new(Arc::new(Plan::new(candidates, probe, settings))),
            active,
            history: ProbeHistory::new(),
            last: RwLock::new(None),
            select_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Build a selector that probes over HTTP as described by `config`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let candidates = config.candidates()?;
        let probe = HttpProbe::new(&config.probe)?;
        Ok(Self::new(candidates, Arc::new(probe), &config.probe))
    }

    /// Probe every candidate, store the winner as the active endpoint and return it.
    ///
    /// Never fails: when nothing is reachable the default candidate is chosen
    /// and callers find out later through ordinary request errors.
    pub async fn select_best_endpoint(&self) -> Url {
        self.run_selection().await.0
    }

    /// Same as [`select_best_endpoint`][Self::select_best_endpoint] but
    /// returns the full report.
    pub async fn select_with_report(&self) -> Arc<Selection> {
        self.run_selection().await.1
    }

    /// Current active endpoint. Does not probe.
    pub fn active_endpoint(&self) -> Url {
        self.active.get()
    }

    /// Shared handle to the active endpoint cell, for HTTP client layers.
    pub fn active_handle(&self) -> ActiveEndpoint {
        self.active.clone()
    }

    pub fn last_selection(&self) -> Option<Arc<Selection>> {
        self.last.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn history(&self) -> &ProbeHistory {
        &self.history
    }

    /// Names of the configured candidates in priority order.
    pub fn candidate_names(&self) -> Vec<String> {
        self.plan().candidates.iter().map(|c| c.name.clone()).collect()
    }

    /// Swap in a new candidate set and probe settings.
    ///
    /// The active endpoint keeps its value until the next selection. The
    /// sticky latch is reset so a sticky selector decides afresh.
    pub async fn reconfigure(
        &self,
        candidates: CandidateSet,
        probe: Arc<dyn Probe>,
        settings: &ProbeConfig,
    ) {
        let _guard = self.select_lock.lock().await;
        self.history
            .retain_candidates(candidates.iter().map(|c| c.name.as_str()));
        *self.plan.write().unwrap_or_else(PoisonError::into_inner) =
            Arc::new(Plan::new(candidates, probe, settings));
        *self.last.write().unwrap_or_else(PoisonError::into_inner) = None;
        info!("selector reconfigured");
    }

    fn plan(&self) -> Arc<Plan> {
        self.plan.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    #[tracing::instrument(skip(self), fields(selection_id = tracing::field::Empty))]
    async fn run_selection(&self) -> (Url, Arc<Selection>) {
        let _guard = self.select_lock.lock().await;
        let plan = self.plan();

        if plan.sticky {
            if let Some(last) = self.last_selection() {
                debug!(url = %last.url, "sticky selection — keeping active endpoint");
                return (self.active.get(), last);
            }
        }

        let id = Uuid::new_v4();
        tracing::Span::current().record("selection_id", tracing::field::display(id));

        let t0 = Instant::now();
        let outcomes = join_all(
            plan.candidates
                .iter()
                .map(|c| probe_bounded(plan.probe.as_ref(), c, plan.timeout)),
        )
        .await;
        let elapsed_ms = t0.elapsed().as_millis() as u64;

        for outcome in &outcomes {
            self.history.record(outcome);
        }

        let live: Vec<bool> = outcomes.iter().map(|o| o.live).collect();
        let (idx, fallback) = choose(&live, plan.candidates.default_index());
        let chosen = &plan.candidates.as_slice()[idx];

        let previous = self.active.set(chosen.url.clone());
        let changed = previous != chosen.url;
        if fallback {
            warn!(
                candidate = %chosen.name,
                url = %chosen.url,
                elapsed_ms,
                "no endpoint is live — falling back to default"
            );
        } else {
            info!(
                candidate = %chosen.name,
                url = %chosen.url,
                elapsed_ms,
                changed,
                "endpoint selected"
            );
        }

        let selection = Arc::new(Selection {
            id,
            selected_at: Utc::now(),
            chosen: chosen.name.clone(),
            url: chosen.url.to_string(),
            fallback,
            elapsed_ms,
            outcomes,
        });
        *self.last.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&selection));

        (chosen.url.clone(), selection)
    }
}

impl Plan {
    fn new(candidates: CandidateSet, probe: Arc<dyn Probe>, settings: &ProbeConfig) -> Self {
        Self {
            candidates,
            probe,
            timeout: Duration::from_millis(settings.timeout_ms),
            sticky: settings.sticky,
        }
    }
}

/// Run one probe under the uniform timeout.
///
/// The bound is applied here as well as in the HTTP client so every [`Probe`]
/// implementation gets the same treatment: a late answer is a dead probe.
async fn probe_bounded(probe: &dyn Probe, candidate: &Candidate, timeout: Duration) -> ProbeOutcome {
    let t0 = Instant::now();
    match tokio::time::timeout(timeout, probe.probe(candidate)).await {
        Ok(outcome) => outcome,
        Err(_) => ProbeOutcome::failed(candidate, &ProbeFailure::Timeout(timeout), t0.elapsed()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use futures_util::future::BoxFuture;
    use reqwest::StatusCode;

    use crate::probe::FailureKind;

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Probe that answers from a fixed script after a per-candidate delay.
    #[derive(Default)]
    struct ScriptedProbe {
        script: HashMap<String, (bool, Duration)>,
        calls: AtomicUsize,
    }

    impl ScriptedProbe {
        fn with(mut self, name: &str, live: bool, delay_ms: u64) -> Self {
            self.script
                .insert(name.into(), (live, Duration::from_millis(delay_ms)));
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Probe for ScriptedProbe {
        fn probe<'a>(&'a self, candidate: &'a Candidate) -> BoxFuture<'a, ProbeOutcome> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let (live, delay) = self
                    .script
                    .get(&candidate.name)
                    .copied()
                    .unwrap_or((false, Duration::ZERO));
                tokio::time::sleep(delay).await;
                if live {
                    ProbeOutcome::live(candidate, StatusCode::OK, delay)
                } else {
                    ProbeOutcome::failed(
                        candidate,
                        &ProbeFailure::Status(StatusCode::SERVICE_UNAVAILABLE),
                        delay,
                    )
                }
            })
        }
    }

    fn candidates() -> CandidateSet {
        CandidateSet::with_last_as_default(vec![
            Candidate::new("dev", Url::parse("https://dev.example/").unwrap()),
            Candidate::new("local", Url::parse("http://192.168.137.1:8080/").unwrap()),
            Candidate::new("prod", Url::parse("https://prod.example/").unwrap()),
        ])
        .unwrap()
    }

    fn settings(timeout_ms: u64) -> ProbeConfig {
        ProbeConfig {
            timeout_ms,
            ..ProbeConfig::default()
        }
    }

    fn selector_with(probe: ScriptedProbe) -> (EndpointSelector, Arc<ScriptedProbe>) {
        let probe = Arc::new(probe);
        let selector = EndpointSelector::new(candidates(), probe.clone(), &settings(1_000));
        (selector, probe)
    }

    fn scripted(dev: bool, local: bool, prod: bool) -> ScriptedProbe {
        ScriptedProbe::default()
            .with("dev", dev, 0)
            .with("local", local, 0)
            .with("prod", prod, 0)
    }

    // -----------------------------------------------------------------------
    // choose — pure policy, no I/O required
    // -----------------------------------------------------------------------

    #[test]
    fn choose_picks_first_live_for_every_permutation() {
        for n in 1..=4usize {
            let default_idx = n - 1;
            for mask in 0u32..(1 << n) {
                let live: Vec<bool> = (0..n).map(|i| mask & (1 << i) != 0).collect();
                let (idx, fallback) = choose(&live, default_idx);
                match live.iter().position(|&l| l) {
                    Some(first) => {
                        assert_eq!(idx, first, "live = {live:?}");
                        assert!(!fallback);
                    }
                    None => {
                        assert_eq!(idx, default_idx, "live = {live:?}");
                        assert!(fallback);
                    }
                }
            }
        }
    }

    #[test]
    fn choose_falls_back_to_designated_default() {
        assert_eq!(choose(&[false, false, false], 1), (1, true));
    }

    #[test]
    fn candidate_set_rejects_empty_list_and_bad_default() {
        assert!(CandidateSet::new(vec![], 0).is_err());
        let one = vec![Candidate::new("only", Url::parse("https://only.example/").unwrap())];
        assert!(CandidateSet::new(one, 1).is_err());
    }

    // -----------------------------------------------------------------------
    // active_endpoint
    // -----------------------------------------------------------------------

    #[test]
    fn active_endpoint_before_selection_is_default() {
        let (selector, probe) = selector_with(scripted(true, true, true));
        assert_eq!(selector.active_endpoint().as_str(), "https://prod.example/");
        assert!(selector.last_selection().is_none());
        assert_eq!(probe.calls(), 0);
    }

    // -----------------------------------------------------------------------
    // select_best_endpoint — concrete scenarios
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn dev_down_local_and_prod_up_selects_local() {
        let (selector, _) = selector_with(scripted(false, true, true));
        let url = selector.select_best_endpoint().await;
        assert_eq!(url.as_str(), "http://192.168.137.1:8080/");
        assert_eq!(selector.active_endpoint(), url);
    }

    #[tokio::test]
    async fn all_down_selects_prod_default() {
        let (selector, _) = selector_with(scripted(false, false, false));
        let selection = selector.select_with_report().await;
        assert_eq!(selection.chosen, "prod");
        assert!(selection.fallback);
        assert_eq!(selector.active_endpoint().as_str(), "https://prod.example/");
    }

    #[tokio::test]
    async fn all_up_selects_dev() {
        let (selector, _) = selector_with(scripted(true, true, true));
        assert_eq!(
            selector.select_best_endpoint().await.as_str(),
            "https://dev.example/"
        );
    }

    #[tokio::test]
    async fn single_live_candidate_wins_regardless_of_position() {
        for (dev, local, prod, expected) in [
            (true, false, false, "dev"),
            (false, true, false, "local"),
            (false, false, true, "prod"),
        ] {
            let (selector, _) = selector_with(scripted(dev, local, prod));
            let selection = selector.select_with_report().await;
            assert_eq!(selection.chosen, expected);
            assert!(!selection.fallback);
        }
    }

    #[tokio::test]
    async fn priority_beats_response_time_for_every_permutation() {
        // Lower-priority candidates answer first.
        for mask in 0u8..8 {
            let (dev, local, prod) = (mask & 1 != 0, mask & 2 != 0, mask & 4 != 0);
            let probe = ScriptedProbe::default()
                .with("dev", dev, 60)
                .with("local", local, 30)
                .with("prod", prod, 0);
            let (selector, _) = selector_with(probe);

            let expected = if dev {
                "dev"
            } else if local {
                "local"
            } else {
                "prod"
            };
            let selection = selector.select_with_report().await;
            assert_eq!(selection.chosen, expected, "dev={dev} local={local} prod={prod}");
            assert_eq!(selection.fallback, !(dev || local || prod));
        }
    }

    #[tokio::test]
    async fn report_lists_every_outcome_in_priority_order() {
        let (selector, probe) = selector_with(scripted(false, true, false));
        let selection = selector.select_with_report().await;

        let names: Vec<&str> = selection.outcomes.iter().map(|o| o.candidate.as_str()).collect();
        assert_eq!(names, ["dev", "local", "prod"]);
        assert_eq!(probe.calls(), 3);
        assert_eq!(selector.last_selection().unwrap().id, selection.id);
    }

    // -----------------------------------------------------------------------
    // Timeouts & concurrency
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn timeout_counts_the_same_as_an_error() {
        let probe = Arc::new(
            ScriptedProbe::default()
                .with("dev", true, 2_000) // would be live, but too slow
                .with("local", false, 0)
                .with("prod", true, 0),
        );
        let selector = EndpointSelector::new(candidates(), probe, &settings(100));

        let selection = selector.select_with_report().await;

        assert_eq!(selection.chosen, "prod");
        assert!(!selection.outcomes[0].live);
        assert_eq!(selection.outcomes[0].failure, Some(FailureKind::Timeout));
        assert!(!selection.outcomes[1].live);
    }

    #[tokio::test]
    async fn probes_run_concurrently() {
        let probe = ScriptedProbe::default()
            .with("dev", false, 300)
            .with("local", false, 300)
            .with("prod", true, 300);
        let (selector, _) = selector_with(probe);

        let t0 = Instant::now();
        selector.select_best_endpoint().await;
        assert!(
            t0.elapsed() < Duration::from_millis(800),
            "probes look sequential: {:?}",
            t0.elapsed()
        );
    }

    #[tokio::test]
    async fn concurrent_selections_leave_consistent_state() {
        let (selector, probe) = selector_with(
            ScriptedProbe::default()
                .with("dev", false, 20)
                .with("local", true, 10)
                .with("prod", true, 0),
        );
        let selector = Arc::new(selector);

        let a = tokio::spawn({
            let s = Arc::clone(&selector);
            async move { s.select_best_endpoint().await }
        });
        let b = tokio::spawn({
            let s = Arc::clone(&selector);
            async move { s.select_best_endpoint().await }
        });
        let (a, b) = (a.await.unwrap(), b.await.unwrap());

        assert_eq!(a, b);
        assert_eq!(probe.calls(), 6);
        assert_eq!(selector.active_endpoint().as_str(), selector.last_selection().unwrap().url);
        assert_eq!(selector.history().get("local").unwrap().probes, 2);
    }

    // -----------------------------------------------------------------------
    // Sticky mode & reconfigure
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn repeated_calls_reprobe_by_default() {
        let (selector, probe) = selector_with(scripted(false, true, true));
        selector.select_best_endpoint().await;
        selector.select_best_endpoint().await;
        assert_eq!(probe.calls(), 6);
    }

    #[tokio::test]
    async fn sticky_selector_probes_only_once() {
        let probe = Arc::new(scripted(false, true, true));
        let selector = EndpointSelector::new(
            candidates(),
            probe.clone(),
            &ProbeConfig {
                sticky: true,
                ..settings(1_000)
            },
        );

        let first = selector.select_best_endpoint().await;
        let second = selector.select_best_endpoint().await;

        assert_eq!(first, second);
        assert_eq!(probe.calls(), 3);
    }

    #[tokio::test]
    async fn reconfigure_keeps_active_until_next_selection() {
        let (selector, _) = selector_with(scripted(true, true, true));
        selector.select_best_endpoint().await;
        assert_eq!(selector.active_endpoint().as_str(), "https://dev.example/");

        let staging = CandidateSet::with_last_as_default(vec![Candidate::new(
            "staging",
            Url::parse("https://staging.example/").unwrap(),
        )])
        .unwrap();
        let probe = Arc::new(ScriptedProbe::default().with("staging", true, 0));
        selector.reconfigure(staging, probe, &settings(1_000)).await;

        assert_eq!(selector.active_endpoint().as_str(), "https://dev.example/");
        assert!(selector.last_selection().is_none());
        assert!(selector.history().get("dev").is_none());
        assert_eq!(selector.candidate_names(), ["staging"]);

        assert_eq!(
            selector.select_best_endpoint().await.as_str(),
            "https://staging.example/"
        );
    }

    #[tokio::test]
    async fn active_handle_observes_selection() {
        let (selector, _) = selector_with(scripted(false, true, false));
        let handle = selector.active_handle();
        selector.select_best_endpoint().await;
        assert_eq!(handle.get().as_str(), "http://192.168.137.1:8080/");
    }

    // -----------------------------------------------------------------------
    // End to end over HTTP
    // -----------------------------------------------------------------------

    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn server_answering(status: u16) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;
        server
    }

    fn http_config(dev: &str, local: &str, prod: &str) -> Config {
        toml::from_str(&format!(
            r#"
            [probe]
            timeout_ms = 2000

            [[endpoints]]
            name = "dev"
            url  = "{dev}"

            [[endpoints]]
            name = "local"
            url  = "{local}"

            [[endpoints]]
            name = "prod"
            url  = "{prod}"
            "#
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn http_selection_skips_failing_dev_server() {
        let dev = server_answering(503).await;
        let local = server_answering(200).await;
        let prod = server_answering(200).await;

        let selector =
            EndpointSelector::from_config(&http_config(&dev.uri(), &local.uri(), &prod.uri()))
                .unwrap();
        let selection = selector.select_with_report().await;

        assert_eq!(selection.chosen, "local");
        assert_eq!(selection.outcomes[0].status, Some(503));
    }

    #[tokio::test]
    async fn http_selection_falls_back_when_nothing_answers() {
        // Port 1 is reserved and never responds
        let selector = EndpointSelector::from_config(&http_config(
            "http://127.0.0.1:1/",
            "http://127.0.0.1:1/local/",
            "http://127.0.0.1:1/prod/",
        ))
        .unwrap();

        let url = selector.select_best_endpoint().await;
        assert_eq!(url.as_str(), "http://127.0.0.1:1/prod/");
        assert!(selector.last_selection().unwrap().fallback);
    }
}
