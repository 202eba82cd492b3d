//! Context navigation for the cascading registry form.
//!
//! The form's client-side state (current selections, populated child options)
//! is a hidden state machine. `Navigator` owns the session and the only model of
//! that state the engine trusts: the last path it established *and verified*.
//! Any failure clears that model so the next request starts from a fresh load.
//!
//! Retry policy, in tiers:
//! 1. the requested mode (incremental suffix re-selection, or full reset)
//! 2. one full reset: reload the portal, reapply State → Ward
//! 3. escalate `CrawlError::Navigation` to the caller, which skips the leaf

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::core::config::FormSelectors;
use crate::core::error::{CrawlError, SessionError};
use crate::core::settle::SettlePolicy;
use crate::core::types::{HierarchyNode, Level, SelectionPath};
use crate::scraping::session::SessionDriver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavMode {
    /// Reuse the page, re-select only the levels that differ from the last path.
    Incremental,
    /// Reload the portal and reapply the whole path.
    FullReset,
}

/// Where a navigation attempt broke down.
#[derive(Debug)]
struct NavFailure {
    level: Level,
    value: String,
    source: SessionError,
}

impl From<NavFailure> for CrawlError {
    fn from(f: NavFailure) -> Self {
        CrawlError::Navigation {
            level: f.level,
            value: f.value,
            source: f.source,
        }
    }
}

pub struct Navigator<S> {
    session: S,
    portal_url: String,
    selectors: FormSelectors,
    settle: SettlePolicy,
    navigation_timeout: Duration,
    control_timeout: Duration,
    last_established: Option<SelectionPath>,
    full_resets: usize,
}

impl<S: SessionDriver> Navigator<S> {
    pub fn new(
        session: S,
        portal_url: impl Into<String>,
        selectors: FormSelectors,
        settle: SettlePolicy,
        navigation_timeout: Duration,
    ) -> Self {
        Self {
            session,
            portal_url: portal_url.into(),
            selectors,
            settle,
            navigation_timeout,
            control_timeout: Duration::from_secs(10),
            last_established: None,
            full_resets: 0,
        }
    }

    pub fn with_control_timeout(mut self, timeout: Duration) -> Self {
        self.control_timeout = timeout;
        self
    }

    pub fn session(&mut self) -> &mut S {
        &mut self.session
    }

    pub fn into_session(self) -> S {
        self.session
    }

    pub fn selectors(&self) -> &FormSelectors {
        &self.selectors
    }

    pub fn settle(&self) -> &SettlePolicy {
        &self.settle
    }

    pub fn last_established(&self) -> Option<&SelectionPath> {
        self.last_established.as_ref()
    }

    /// Number of page reloads performed so far (startup load excluded).
    pub fn full_resets(&self) -> usize {
        self.full_resets
    }

    /// Forget the modelled page state; the next `establish` reloads.
    pub fn invalidate(&mut self) {
        self.last_established = None;
    }

    /// Initial load of the portal. Failure here is a startup fault.
    pub async fn open(&mut self) -> Result<(), CrawlError> {
        info!("loading portal {}", self.portal_url);
        self.load_page().await.map_err(|e| {
            CrawlError::Startup(format!("portal {} unreachable: {}", self.portal_url, e))
        })?;
        self.last_established = Some(SelectionPath::new());
        Ok(())
    }

    /// Drive the form into `path` and verify every level reads back as intended.
    pub async fn establish(
        &mut self,
        path: &SelectionPath,
        mode: NavMode,
    ) -> Result<(), CrawlError> {
        let first = match mode {
            NavMode::Incremental => self.try_incremental(path).await,
            NavMode::FullReset => self.try_full_reset(path).await,
        };

        match first {
            Ok(()) => {
                self.last_established = Some(path.clone());
                Ok(())
            }
            Err(e) => {
                warn!(
                    "navigation to [{}] failed at {} '{}': {}; retrying with full reset",
                    path, e.level, e.value, e.source
                );
                self.last_established = None;
                match self.try_full_reset(path).await {
                    Ok(()) => {
                        self.last_established = Some(path.clone());
                        Ok(())
                    }
                    Err(e) => {
                        self.last_established = None;
                        Err(e.into())
                    }
                }
            }
        }
    }

    /// Select the terminal centre under an established `path`.
    ///
    /// A refused selection gets one full reset of `path` and a second attempt.
    pub async fn select_terminal(
        &mut self,
        path: &SelectionPath,
        centre: &HierarchyNode,
    ) -> Result<(), CrawlError> {
        let control = self.selectors.control(Level::Centre).to_string();
        match self.session.select_option(&control, &centre.value).await {
            Ok(()) => {
                self.settle.after_select().await;
                return Ok(());
            }
            Err(e) => {
                warn!(
                    "centre '{}' refused: {}; retrying with full reset",
                    centre.label, e
                );
            }
        }

        self.establish(path, NavMode::FullReset).await?;
        match self.session.select_option(&control, &centre.value).await {
            Ok(()) => {
                self.settle.after_select().await;
                Ok(())
            }
            Err(source) => {
                self.last_established = None;
                Err(CrawlError::Navigation {
                    level: Level::Centre,
                    value: centre.value.clone(),
                    source,
                })
            }
        }
    }

    /// Selected value of every path level, as the page currently reports it.
    pub async fn current_selection(&mut self) -> Vec<Option<String>> {
        let mut out = Vec::with_capacity(Level::PATH_LEVELS.len());
        for level in Level::PATH_LEVELS {
            let control = self.selectors.control(level).to_string();
            out.push(self.session.selected_value(&control).await.ok().flatten());
        }
        out
    }

    async fn load_page(&mut self) -> Result<(), SessionError> {
        self.session
            .navigate(&self.portal_url, self.navigation_timeout)
            .await?;
        let root = self.selectors.control(Level::State).to_string();
        self.session
            .wait_for_selector(&root, self.control_timeout)
            .await
    }

    async fn try_full_reset(&mut self, path: &SelectionPath) -> Result<(), NavFailure> {
        self.full_resets += 1;
        debug!("full reset → [{}]", path);
        self.load_page().await.map_err(|source| NavFailure {
            level: Level::State,
            value: self.portal_url.clone(),
            source,
        })?;
        self.apply(path, 0).await?;
        self.verify(path).await
    }

    async fn try_incremental(&mut self, path: &SelectionPath) -> Result<(), NavFailure> {
        let Some(prev) = self.last_established.clone() else {
            return self.try_full_reset(path).await;
        };
        if path.is_empty() {
            return self.try_full_reset(path).await;
        }

        let mut from = prev.common_prefix_len(path);
        // Re-selecting the deepest kept level clears everything below it.
        if path.len() < prev.len() && from == path.len() {
            from = path.len() - 1;
        }
        debug!(
            "incremental → [{}] (re-selecting {} of {} level(s))",
            path,
            path.len() - from,
            path.len()
        );
        self.apply(path, from).await?;
        self.verify(path).await
    }

    async fn apply(&mut self, path: &SelectionPath, from: usize) -> Result<(), NavFailure> {
        for node in path.nodes().iter().skip(from) {
            let control = self.selectors.control(node.level).to_string();
            self.session
                .select_option(&control, &node.value)
                .await
                .map_err(|source| NavFailure {
                    level: node.level,
                    value: node.value.clone(),
                    source,
                })?;
            self.settle.after_select().await;
        }
        Ok(())
    }

    async fn verify(&mut self, path: &SelectionPath) -> Result<(), NavFailure> {
        for node in path.nodes() {
            let control = self.selectors.control(node.level).to_string();
            let actual = self
                .session
                .selected_value(&control)
                .await
                .map_err(|source| NavFailure {
                    level: node.level,
                    value: node.value.clone(),
                    source,
                })?;
            if actual.as_deref() != Some(node.value.as_str()) {
                return Err(NavFailure {
                    level: node.level,
                    value: node.value.clone(),
                    source: SessionError::Desynchronized {
                        control,
                        expected: node.value.clone(),
                        actual: actual.unwrap_or_default(),
                    },
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockRegistry, MockSession};

    fn node(level: Level, value: &str) -> HierarchyNode {
        HierarchyNode::new(level, value, format!("{} {}", level, value)).unwrap()
    }

    fn path(values: &[&str]) -> SelectionPath {
        SelectionPath::from_nodes(
            values
                .iter()
                .zip(Level::PATH_LEVELS)
                .map(|(v, l)| node(l, v)),
        )
        .unwrap()
    }

    fn navigator(session: MockSession) -> Navigator<MockSession> {
        Navigator::new(
            session,
            "http://portal.test/",
            FormSelectors::default(),
            SettlePolicy::immediate(),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_establish_reads_back_exact_path() {
        let mut nav = navigator(MockSession::new(MockRegistry::uniform([2, 2, 2, 2, 1], 0)));
        nav.open().await.unwrap();

        for p in [
            path(&["1", "2", "1", "2"]),
            path(&["2", "1", "2", "1"]),
            path(&["2", "1", "2", "2"]),
        ] {
            nav.establish(&p, NavMode::Incremental).await.unwrap();
            let current = nav.current_selection().await;
            let expected: Vec<Option<String>> =
                p.nodes().iter().map(|n| Some(n.value.clone())).collect();
            assert_eq!(current, expected);
            assert_eq!(nav.last_established(), Some(&p));
        }
    }

    #[tokio::test]
    async fn test_incremental_only_reselects_changed_suffix() {
        let mut nav = navigator(MockSession::new(MockRegistry::uniform([1, 1, 1, 3, 1], 0)));
        nav.open().await.unwrap();
        nav.establish(&path(&["1", "1", "1", "1"]), NavMode::Incremental)
            .await
            .unwrap();
        let before = nav.session().stats.clone();

        nav.establish(&path(&["1", "1", "1", "3"]), NavMode::Incremental)
            .await
            .unwrap();
        let after = nav.session().stats.clone();
        assert_eq!(after.selects - before.selects, 1);
        assert_eq!(after.navigations, before.navigations);
    }

    #[tokio::test]
    async fn test_shorter_path_clears_deeper_levels() {
        let mut nav = navigator(MockSession::new(MockRegistry::uniform([1, 2, 2, 2, 1], 0)));
        nav.open().await.unwrap();
        nav.establish(&path(&["1", "2", "2", "2"]), NavMode::Incremental)
            .await
            .unwrap();
        nav.establish(&path(&["1", "2"]), NavMode::Incremental)
            .await
            .unwrap();
        let current = nav.current_selection().await;
        assert_eq!(current[1].as_deref(), Some("2"));
        assert_eq!(current[2], None);
        assert_eq!(current[3], None);
    }

    #[tokio::test]
    async fn test_refused_selection_recovers_with_one_full_reset() {
        let session = MockSession::new(MockRegistry::uniform([1, 1, 2, 1, 1], 0))
            .refuse_selection(Level::Municipality, "2", 1);
        let mut nav = navigator(session);
        nav.open().await.unwrap();
        nav.establish(&path(&["1", "1", "1", "1"]), NavMode::Incremental)
            .await
            .unwrap();
        let resets = nav.full_resets();

        nav.establish(&path(&["1", "1", "2", "1"]), NavMode::Incremental)
            .await
            .unwrap();
        assert_eq!(nav.full_resets(), resets + 1);
        assert_eq!(nav.session().stats.refused_selects, 1);
    }

    #[tokio::test]
    async fn test_second_consecutive_failure_escalates() {
        let session = MockSession::new(MockRegistry::uniform([1, 1, 2, 1, 1], 0))
            .refuse_selection(Level::Municipality, "2", 2);
        let mut nav = navigator(session);
        nav.open().await.unwrap();

        let err = nav
            .establish(&path(&["1", "1", "2", "1"]), NavMode::Incremental)
            .await
            .unwrap_err();
        match err {
            CrawlError::Navigation { level, value, .. } => {
                assert_eq!(level, Level::Municipality);
                assert_eq!(value, "2");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(nav.last_established().is_none());
    }

    #[tokio::test]
    async fn test_value_absent_from_control_escalates() {
        let mut nav = navigator(MockSession::new(MockRegistry::uniform([1, 1, 1, 1, 1], 0)));
        nav.open().await.unwrap();
        let err = nav
            .establish(&path(&["1", "9"]), NavMode::FullReset)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "navigation");
    }

    #[tokio::test]
    async fn test_unreachable_portal_is_startup_fault() {
        let mut session = MockSession::new(MockRegistry::new());
        session.unreachable = true;
        let mut nav = navigator(session);
        let err = nav.open().await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_select_terminal_retries_after_refusal() {
        let session = MockSession::new(MockRegistry::uniform([1, 1, 1, 1, 2], 0))
            .refuse_selection(Level::Centre, "2", 1);
        let mut nav = navigator(session);
        nav.open().await.unwrap();
        let p = path(&["1", "1", "1", "1"]);
        nav.establish(&p, NavMode::Incremental).await.unwrap();

        nav.select_terminal(&p, &node(Level::Centre, "2")).await.unwrap();
        let centre = nav
            .session()
            .selected_value("select#reg_centre")
            .await
            .unwrap();
        assert_eq!(centre.as_deref(), Some("2"));
    }
}
