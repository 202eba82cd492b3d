//! Depth-first crawl over State → District → Municipality → Ward → Centre.
//!
//! Every leaf is a fault-isolation boundary: whatever goes wrong while
//! navigating to, extracting or persisting one leaf is logged, counted and
//! skipped. Only a startup fault (browser or portal unavailable) ends a run.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::error::CrawlError;
use crate::core::types::{HierarchyNode, Leaf, Level, LeafResult, SelectionPath};
use crate::features::diagnostics;
use crate::features::paths::{self, CollisionTracker};
use crate::features::sink::ResultSink;
use crate::features::summary::RunSummary;
use crate::scraping::session::SessionDriver;
use crate::tools::discovery::discover;
use crate::tools::extractor::Extractor;
use crate::tools::navigator::{NavMode, Navigator};

/// Cooperative stop request, honoured between leaves only.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub output_root: PathBuf,
    /// Stop after this many leaves were processed. Skipped-existing leaves
    /// do not count.
    pub max_leaves: Option<usize>,
    /// Capture a PNG of the tab when a leaf faults.
    pub screenshots_dir: Option<PathBuf>,
}

impl CrawlOptions {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            max_leaves: None,
            screenshots_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Halt,
}

pub struct Crawler<S, K> {
    navigator: Navigator<S>,
    extractor: Extractor,
    sink: K,
    options: CrawlOptions,
    stop: StopSignal,
    summary: RunSummary,
    collisions: CollisionTracker,
    processed: usize,
    opened: bool,
}

impl<S: SessionDriver, K: ResultSink> Crawler<S, K> {
    pub fn new(
        navigator: Navigator<S>,
        extractor: Extractor,
        sink: K,
        options: CrawlOptions,
    ) -> Self {
        Self {
            navigator,
            extractor,
            sink,
            options,
            stop: StopSignal::new(),
            summary: RunSummary::start(),
            collisions: CollisionTracker::new(),
            processed: 0,
            opened: false,
        }
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn navigator(&mut self) -> &mut Navigator<S> {
        &mut self.navigator
    }

    pub fn into_session(self) -> S {
        self.navigator.into_session()
    }

    /// Load the portal. Called by `run` when not done already.
    pub async fn open(&mut self) -> Result<(), CrawlError> {
        if !self.opened {
            self.navigator.open().await?;
            self.opened = true;
        }
        Ok(())
    }

    /// Discover the top-level states.
    pub async fn root_states(&mut self) -> Result<Vec<HierarchyNode>, CrawlError> {
        self.open().await?;
        if self.navigator.last_established().is_none() {
            self.navigator
                .establish(&SelectionPath::new(), NavMode::FullReset)
                .await?;
        }
        Ok(self.children(Level::State).await)
    }

    /// Crawl every state, or only those in `root_states` (matched by value, or
    /// by label ignoring case).
    pub async fn run(&mut self, root_states: Option<&[String]>) -> Result<RunSummary, CrawlError> {
        self.summary = RunSummary::start();
        self.processed = 0;

        let mut states = self.root_states().await?;
        if states.is_empty() {
            warn!("portal lists no states; nothing to crawl");
        }
        if let Some(filter) = root_states {
            states = select_states(states, filter);
            info!("restricted to {} state(s)", states.len());
        }

        'walk: for state in states {
            if self.halted() {
                break;
            }
            let Some(p_state) = extend(&SelectionPath::new(), state) else {
                continue;
            };
            info!("state: {}", p_state);
            for p_district in self.expand(&p_state).await {
                if self.halted() {
                    break 'walk;
                }
                for p_mun in self.expand(&p_district).await {
                    if self.halted() {
                        break 'walk;
                    }
                    for p_ward in self.expand(&p_mun).await {
                        if self.halted() || self.visit_ward(&p_ward).await == Flow::Halt {
                            break 'walk;
                        }
                    }
                }
            }
        }

        self.summary.finish();
        self.summary.log();
        Ok(self.summary.clone())
    }

    fn halted(&mut self) -> bool {
        if self.stop.is_stopped() {
            if !self.summary.stopped {
                info!("stop requested; ending at leaf boundary");
            }
            self.summary.stopped = true;
            return true;
        }
        if let Some(cap) = self.options.max_leaves {
            if self.processed >= cap {
                if !self.summary.cap_reached {
                    info!("leaf cap of {} reached", cap);
                }
                self.summary.cap_reached = true;
                return true;
            }
        }
        false
    }

    /// Child paths of `path`. A branch that cannot be established is counted
    /// as a navigation fault and yields no children.
    async fn expand(&mut self, path: &SelectionPath) -> Vec<SelectionPath> {
        if let Err(e) = self.navigator.establish(path, NavMode::Incremental).await {
            warn!("skipping branch [{}]: {}", path, e);
            self.summary.record_fault(&e);
            return Vec::new();
        }
        let Some(level) = path.next_level() else {
            return Vec::new();
        };
        let children = self.children(level).await;
        if children.is_empty() {
            debug!("[{}] has no {} options", path, level);
        }
        children
            .into_iter()
            .filter_map(|node| extend(path, node))
            .collect()
    }

    /// Options of `level` under the currently established path.
    async fn children(&mut self, level: Level) -> Vec<HierarchyNode> {
        let control = self.navigator.selectors().control(level).to_string();
        discover(self.navigator.session(), &control, level).await
    }

    async fn visit_ward(&mut self, ward: &SelectionPath) -> Flow {
        if let Err(e) = self.navigator.establish(ward, NavMode::Incremental).await {
            warn!("skipping ward [{}]: {}", ward, e);
            self.summary.record_fault(&e);
            return Flow::Continue;
        }
        let centres = self.children(Level::Centre).await;
        if centres.is_empty() {
            debug!("[{}] has no polling centres", ward);
        }

        for centre in centres {
            if self.halted() {
                return Flow::Halt;
            }
            let leaf = Leaf {
                path: ward.clone(),
                centre,
            };
            let out = paths::output_path(&self.options.output_root, &leaf);

            if let Some(prev) = self.collisions.claim(&out, &leaf) {
                warn!(
                    "output collision: [{}] and [{} -> {} -> Ward {} -> {}] both map to {}",
                    leaf,
                    prev[0],
                    prev[1],
                    prev[2],
                    prev[3],
                    out.display()
                );
                self.summary.collisions += 1;
            }

            if self.sink.exists(&out) {
                debug!("[{}] already saved, skipping", leaf);
                self.summary.leaves_skipped_existing += 1;
                continue;
            }

            if self.processed > 0 {
                self.navigator.settle().between_leaves().await;
            }
            self.process_leaf(&leaf, &out).await;
            self.processed += 1;
            self.summary.leaves_visited += 1;
        }
        Flow::Continue
    }

    async fn process_leaf(&mut self, leaf: &Leaf, out: &std::path::Path) {
        info!("leaf: {}", leaf);
        let outcome = self.extract_leaf(leaf).await;
        match outcome {
            Ok(result) if result.timed_out => {
                self.summary.extraction_timeouts += 1;
                self.snapshot(leaf).await;
            }
            Ok(result) if result.is_empty() => {
                info!("[{}] no records", leaf);
                self.summary.leaves_empty += 1;
            }
            Ok(result) => match self.sink.persist(&result.records, out) {
                Ok(n) => {
                    info!("[{}] saved {} record(s) → {}", leaf, n, out.display());
                    self.summary.leaves_with_data += 1;
                    self.summary.records_written += n;
                }
                Err(e) => {
                    warn!("[{}] {}", leaf, e);
                    self.summary.record_fault(&e);
                }
            },
            Err(e) => {
                warn!("[{}] skipped: {}", leaf, e);
                self.summary.record_fault(&e);
                self.snapshot(leaf).await;
            }
        }
        // The page now shows a submitted result; the next leaf starts from a reload.
        self.navigator.invalidate();
    }

    async fn extract_leaf(&mut self, leaf: &Leaf) -> Result<LeafResult, CrawlError> {
        self.navigator
            .establish(&leaf.path, NavMode::Incremental)
            .await?;
        self.navigator.select_terminal(&leaf.path, &leaf.centre).await?;
        self.extractor
            .extract(self.navigator.session(), leaf)
            .await
    }

    async fn snapshot(&mut self, leaf: &Leaf) {
        if let Some(dir) = self.options.screenshots_dir.clone() {
            diagnostics::capture_failure(self.navigator.session(), &dir, leaf).await;
        }
    }
}

fn extend(path: &SelectionPath, node: HierarchyNode) -> Option<SelectionPath> {
    match path.child(node) {
        Ok(p) => Some(p),
        Err(e) => {
            warn!("discarding out-of-order option under [{}]: {}", path, e);
            None
        }
    }
}

/// Keep the states named in `filter`, in discovery order.
pub fn select_states(states: Vec<HierarchyNode>, filter: &[String]) -> Vec<HierarchyNode> {
    let matches = |s: &HierarchyNode, f: &str| {
        let f = f.trim();
        s.value == f || s.label.eq_ignore_ascii_case(f)
    };
    for f in filter {
        if !states.iter().any(|s| matches(s, f)) {
            warn!("state filter '{}' matches no state on the portal", f);
        }
    }
    states
        .into_iter()
        .filter(|s| filter.iter().any(|f| matches(s, f)))
        .collect()
}
