//! In-memory stand-in for the registry portal.
//!
//! `MockSession` implements [`SessionDriver`] over a scripted option tree and
//! models the behaviours the engine has to cope with: dependent selects that
//! only list children of the current parent selection, selections refused
//! after a submit, a result table that sometimes never attaches, and a result
//! widget that shows one page of rows until its page size is forced to "All".

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::config::FormSelectors;
use crate::core::error::SessionError;
use crate::core::types::Level;
use crate::scraping::session::{RawOption, SessionDriver};

pub const PLACEHOLDER_LABEL: &str = "-- select --";

/// Scripted registry contents, keyed by the `/`-joined value path of the parent.
///
/// `""` holds the states, `"3"` the districts of state 3, `"3/28"` the
/// municipalities of district 28, and so on down to centres.
#[derive(Debug, Clone, Default)]
pub struct MockRegistry {
    children: HashMap<String, Vec<RawOption>>,
    tables: HashMap<String, Vec<Vec<String>>>,
    headers: Option<Vec<String>>,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn options(mut self, parent: &[&str], opts: &[(&str, &str)]) -> Self {
        self.children.insert(
            parent.join("/"),
            opts.iter().map(|(v, l)| RawOption::new(*v, *l)).collect(),
        );
        self
    }

    /// Result rows for the leaf `[state, district, municipality, ward, centre]`.
    pub fn table(mut self, leaf: &[&str], rows: Vec<Vec<String>>) -> Self {
        self.tables.insert(leaf.join("/"), rows);
        self
    }

    pub fn headers(mut self, headers: &[&str]) -> Self {
        self.headers = Some(headers.iter().map(|h| h.to_string()).collect());
        self
    }

    /// Uniform tree: `fanout[i]` children at every node of level `i`, values
    /// `1..=n`, labels `"<level> <value>"`. Every leaf gets `rows_per_leaf` rows.
    pub fn uniform(fanout: [usize; 5], rows_per_leaf: usize) -> Self {
        let mut reg = Self::new();
        let mut frontier: Vec<Vec<String>> = vec![Vec::new()];
        let levels = [
            Level::State,
            Level::District,
            Level::Municipality,
            Level::Ward,
            Level::Centre,
        ];
        for (depth, level) in levels.iter().enumerate() {
            let mut next = Vec::new();
            for parent in &frontier {
                let opts: Vec<RawOption> = (1..=fanout[depth])
                    .map(|i| RawOption::new(i.to_string(), format!("{} {}", level, i)))
                    .collect();
                for o in &opts {
                    let mut p = parent.clone();
                    p.push(o.value.clone());
                    next.push(p);
                }
                reg.children.insert(parent.join("/"), opts);
            }
            frontier = next;
        }
        for leaf in frontier {
            let key = leaf.join("/");
            let rows = (0..rows_per_leaf)
                .map(|i| voter_row(&format!("{}#{}", key, i), 9))
                .collect();
            reg.tables.insert(key, rows);
        }
        reg
    }

    pub fn leaf_count(&self) -> usize {
        self.tables.len()
    }
}

/// A result row with `cells` cells: serial, link, then voter fields.
pub fn voter_row(voter_id: &str, cells: usize) -> Vec<String> {
    let full = [
        "1".to_string(),
        "view".to_string(),
        voter_id.to_string(),
        format!("Name {}", voter_id),
        "34".to_string(),
        "F".to_string(),
        "Spouse".to_string(),
        "Parent".to_string(),
        "Mother".to_string(),
    ];
    let mut row: Vec<String> = full.iter().take(cells).cloned().collect();
    while row.len() < cells {
        row.push(String::new());
    }
    row
}

/// Counters a test can assert on after a run.
#[derive(Debug, Clone, Default)]
pub struct MockStats {
    pub navigations: usize,
    pub selects: usize,
    pub refused_selects: usize,
    pub submits: usize,
    pub page_size_expansions: usize,
    pub table_reads: usize,
    pub screenshots: Vec<PathBuf>,
}

pub struct MockSession {
    registry: MockRegistry,
    selectors: FormSelectors,
    page_loaded: bool,
    selections: [Option<String>; 5],
    submitted_leaf: Option<String>,
    expanded: bool,
    /// Rows visible before the page size is forced.
    pub page_len: usize,
    /// Submit control present on the page; `None` means no submit control at all.
    pub submit_selector: Option<String>,
    pub has_page_size_control: bool,
    /// Leaf keys whose result table never attaches.
    pub never_attach: HashSet<String>,
    /// `(level, value)` selections refused this many more times.
    pub refuse: HashMap<(Level, String), usize>,
    /// Every navigation fails.
    pub unreachable: bool,
    pub stats: MockStats,
}

impl MockSession {
    pub fn new(registry: MockRegistry) -> Self {
        Self {
            registry,
            selectors: FormSelectors::default(),
            page_loaded: false,
            selections: Default::default(),
            submitted_leaf: None,
            expanded: false,
            page_len: 10,
            submit_selector: Some("button.btn-success".to_string()),
            has_page_size_control: true,
            never_attach: HashSet::new(),
            refuse: HashMap::new(),
            unreachable: false,
            stats: MockStats::default(),
        }
    }

    /// Refuse selecting `value` at `level` for the next `times` attempts.
    pub fn refuse_selection(mut self, level: Level, value: &str, times: usize) -> Self {
        self.refuse.insert((level, value.to_string()), times);
        self
    }

    pub fn never_attach_table(mut self, leaf: &[&str]) -> Self {
        self.never_attach.insert(leaf.join("/"));
        self
    }

    fn level_of(&self, control: &str) -> Option<Level> {
        [
            Level::State,
            Level::District,
            Level::Municipality,
            Level::Ward,
            Level::Centre,
        ]
        .into_iter()
        .find(|l| self.selectors.control(*l) == control)
    }

    fn parent_key(&self, level: Level) -> Option<String> {
        let depth = level.depth();
        let mut parts = Vec::with_capacity(depth);
        for sel in self.selections.iter().take(depth) {
            parts.push(sel.clone()?);
        }
        Some(parts.join("/"))
    }

    fn current_options(&self, level: Level) -> Vec<RawOption> {
        let mut opts = vec![RawOption::new("", PLACEHOLDER_LABEL)];
        if !self.page_loaded {
            return Vec::new();
        }
        if let Some(key) = self.parent_key(level) {
            if let Some(children) = self.registry.children.get(&key) {
                opts.extend(children.iter().cloned());
            }
        }
        opts
    }

    fn leaf_key(&self) -> Option<String> {
        let parts: Option<Vec<String>> = self.selections.iter().cloned().collect();
        parts.map(|p| p.join("/"))
    }

    fn visible_rows(&self) -> Vec<Vec<String>> {
        let Some(key) = self.submitted_leaf.as_ref() else {
            return Vec::new();
        };
        let rows = self.registry.tables.get(key).cloned().unwrap_or_default();
        if self.expanded {
            rows
        } else {
            rows.into_iter().take(self.page_len).collect()
        }
    }

    fn table_attached(&self) -> bool {
        matches!(&self.submitted_leaf, Some(k) if !self.never_attach.contains(k))
    }

    fn render_table(&self) -> String {
        let mut html = String::from("<table id=\"tbl_data\">");
        if let Some(headers) = &self.registry.headers {
            html.push_str("<thead><tr>");
            for h in headers {
                html.push_str(&format!("<th>{}</th>", h));
            }
            html.push_str("</tr></thead>");
        }
        html.push_str("<tbody>");
        for row in self.visible_rows() {
            html.push_str("<tr>");
            for cell in row {
                html.push_str(&format!("<td> {} </td>", cell));
            }
            html.push_str("</tr>");
        }
        html.push_str("</tbody></table>");
        html
    }
}

#[async_trait]
impl SessionDriver for MockSession {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), SessionError> {
        self.stats.navigations += 1;
        if self.unreachable {
            return Err(SessionError::Timeout {
                what: format!("navigation to {}", url),
                timeout,
            });
        }
        self.page_loaded = true;
        self.selections = Default::default();
        self.submitted_leaf = None;
        self.expanded = false;
        Ok(())
    }

    async fn select_option(&mut self, control: &str, value: &str) -> Result<(), SessionError> {
        self.stats.selects += 1;
        let Some(level) = self.level_of(control) else {
            return Err(SessionError::ElementMissing(control.to_string()));
        };
        if !self.page_loaded {
            return Err(SessionError::ElementMissing(control.to_string()));
        }
        if let Some(left) = self.refuse.get_mut(&(level, value.to_string())) {
            if *left > 0 {
                *left -= 1;
                self.stats.refused_selects += 1;
                return Err(SessionError::OptionUnavailable {
                    control: control.to_string(),
                    value: value.to_string(),
                });
            }
        }
        let available = self
            .current_options(level)
            .iter()
            .any(|o| !o.value.is_empty() && o.value == value);
        if !available {
            return Err(SessionError::OptionUnavailable {
                control: control.to_string(),
                value: value.to_string(),
            });
        }
        let depth = level.depth();
        self.selections[depth] = Some(value.to_string());
        for deeper in self.selections.iter_mut().skip(depth + 1) {
            *deeper = None;
        }
        Ok(())
    }

    async fn evaluate(&mut self, _script: &str) -> Result<Value, SessionError> {
        Ok(Value::Null)
    }

    async fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        let present = if selector == self.selectors.result_table {
            self.table_attached()
        } else if let Some(level) = self.level_of(selector) {
            self.page_loaded && (level == Level::State || self.parent_key(level).is_some())
        } else {
            false
        };
        if present {
            Ok(())
        } else {
            Err(SessionError::Timeout {
                what: selector.to_string(),
                timeout,
            })
        }
    }

    async fn query_count(&mut self, _selector: &str) -> Result<usize, SessionError> {
        Ok(0)
    }

    async fn click(&mut self, selector: &str) -> Result<bool, SessionError> {
        if self.submit_selector.as_deref() != Some(selector) {
            return Ok(false);
        }
        self.stats.submits += 1;
        self.submitted_leaf = self.leaf_key();
        self.expanded = false;
        Ok(true)
    }

    async fn screenshot(&mut self, path: &Path) -> Result<(), SessionError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, b"\x89PNG")?;
        self.stats.screenshots.push(path.to_path_buf());
        Ok(())
    }

    async fn read_options(&mut self, control: &str) -> Result<Vec<RawOption>, SessionError> {
        Ok(self
            .level_of(control)
            .map(|l| self.current_options(l))
            .unwrap_or_default())
    }

    async fn selected_value(&mut self, control: &str) -> Result<Option<String>, SessionError> {
        Ok(self
            .level_of(control)
            .and_then(|l| self.selections[l.depth()].clone()))
    }

    async fn table_html(&mut self, selector: &str) -> Result<Option<String>, SessionError> {
        self.stats.table_reads += 1;
        if selector != self.selectors.result_table || !self.table_attached() {
            return Ok(None);
        }
        Ok(Some(self.render_table()))
    }

    async fn expand_page_size(&mut self, _select_name: &str) -> Result<bool, SessionError> {
        if !self.has_page_size_control || !self.table_attached() {
            return Ok(false);
        }
        self.stats.page_size_expansions += 1;
        self.expanded = true;
        Ok(true)
    }

    async fn row_count(&mut self, _table: &str) -> Result<usize, SessionError> {
        Ok(self.visible_rows().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dependent_select_lists_only_children_of_parent() {
        let reg = MockRegistry::new()
            .options(&[], &[("3", "Bagmati")])
            .options(&["3"], &[("27", "Bhaktapur"), ("28", "Lalitpur")]);
        let mut s = MockSession::new(reg);
        let sel = FormSelectors::default();

        assert!(s.read_options(&sel.district).await.unwrap().is_empty());
        s.navigate("http://portal", Duration::from_secs(1)).await.unwrap();
        assert_eq!(s.read_options(&sel.district).await.unwrap().len(), 1);

        s.select_option(&sel.state, "3").await.unwrap();
        let districts = s.read_options(&sel.district).await.unwrap();
        assert_eq!(districts.len(), 3);
        assert_eq!(districts[0].value, "");
    }

    #[tokio::test]
    async fn test_reselecting_parent_clears_children() {
        let reg = MockRegistry::uniform([1, 2, 1, 1, 1], 0);
        let mut s = MockSession::new(reg);
        let sel = FormSelectors::default();
        s.navigate("http://portal", Duration::from_secs(1)).await.unwrap();
        s.select_option(&sel.state, "1").await.unwrap();
        s.select_option(&sel.district, "2").await.unwrap();
        s.select_option(&sel.municipality, "1").await.unwrap();
        s.select_option(&sel.district, "1").await.unwrap();
        assert_eq!(s.selected_value(&sel.municipality).await.unwrap(), None);
    }

    #[test]
    fn test_uniform_tree_leaf_count() {
        let reg = MockRegistry::uniform([1, 2, 2, 1, 3], 1);
        assert_eq!(reg.leaf_count(), 12);
    }
}
