//! Leaf extraction: submit the form, force the result widget to show every
//! row, read the table once and map its rows into [`VoterRecord`]s.

use regex::Regex;
use scraper::{Html, Selector};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::core::config::FormSelectors;
use crate::core::error::{CrawlError, SessionError};
use crate::core::settle::{SettleMode, SettlePolicy};
use crate::core::types::{Leaf, LeafResult, VoterRecord};
use crate::scraping::session::SessionDriver;

/// Rows with fewer cells than this are not voter rows (pager, "no data" rows).
pub const MIN_CELLS: usize = 8;

/// Header cells and body rows of one result table, as trimmed cell text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Parse the outer HTML of the result table.
pub fn parse_table(html: &str) -> ParsedTable {
    let fragment = Html::parse_fragment(html);
    let (Ok(header_sel), Ok(row_sel), Ok(cell_sel)) = (
        Selector::parse("thead th, thead td"),
        Selector::parse("tbody tr"),
        Selector::parse("td"),
    ) else {
        return ParsedTable::default();
    };

    let headers = fragment
        .select(&header_sel)
        .map(|c| cell_text(c.text()))
        .collect();

    let rows = fragment
        .select(&row_sel)
        .map(|row| row.select(&cell_sel).map(|c| cell_text(c.text())).collect())
        .collect();

    ParsedTable { headers, rows }
}

fn cell_text<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Cell index of every voter field within a body row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMap {
    pub voter_id: usize,
    pub name: usize,
    pub age: usize,
    pub gender: usize,
    pub spouse: usize,
    pub parent: usize,
    pub mother: Option<usize>,
}

impl Default for ColumnMap {
    /// Serial, details link, then the voter columns in registry order.
    fn default() -> Self {
        Self {
            voter_id: 2,
            name: 3,
            age: 4,
            gender: 5,
            spouse: 6,
            parent: 7,
            mother: Some(8),
        }
    }
}

#[derive(Clone, Copy)]
enum Field {
    VoterId,
    Name,
    Age,
    Gender,
    Spouse,
    Parent,
    Mother,
}

/// Ordered most-specific first: "Spouse Name" must not be taken for "Name",
/// "Father/Mother Name" is the parent column.
fn header_patterns() -> &'static [(Field, Regex)] {
    static PATTERNS: OnceLock<Vec<(Field, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (Field::Spouse, r"(?i)spouse|husband|wife|पति|पत्नी"),
            (Field::Parent, r"(?i)parent|father|बाबु|पिता|बुबा"),
            (Field::Mother, r"(?i)mother|आमा"),
            (Field::VoterId, r"(?i)voter\s*(id|no|number)|मतदाता\s*(नं|नम्बर|परिचय)"),
            (Field::Age, r"(?i)\bage\b|उमेर"),
            (Field::Gender, r"(?i)gender|\bsex\b|लिङ्ग|लिंग"),
            (Field::Name, r"(?i)\bname\b|नाम"),
        ]
        .into_iter()
        .filter_map(|(f, p)| Regex::new(p).ok().map(|r| (f, r)))
        .collect()
    })
}

impl ColumnMap {
    /// Map from recognised header text. `None` unless every required field
    /// (all but mother) was found.
    pub fn from_headers(headers: &[String]) -> Option<Self> {
        let mut found: [Option<usize>; 7] = [None; 7];
        for (idx, header) in headers.iter().enumerate() {
            let field = header_patterns()
                .iter()
                .find(|(f, re)| found[*f as usize].is_none() && re.is_match(header))
                .map(|(f, _)| *f);
            if let Some(f) = field {
                found[f as usize] = Some(idx);
            }
        }
        Some(Self {
            voter_id: found[Field::VoterId as usize]?,
            name: found[Field::Name as usize]?,
            age: found[Field::Age as usize]?,
            gender: found[Field::Gender as usize]?,
            spouse: found[Field::Spouse as usize]?,
            parent: found[Field::Parent as usize]?,
            mother: found[Field::Mother as usize],
        })
    }

    /// Header-driven map when the header is recognisable, fixed positions otherwise.
    pub fn resolve(headers: &[String]) -> Self {
        match Self::from_headers(headers) {
            Some(map) => map,
            None => {
                if !headers.is_empty() {
                    debug!("unrecognised result header {:?}, using fixed columns", headers);
                }
                Self::default()
            }
        }
    }

    fn required_width(&self) -> usize {
        [
            self.voter_id,
            self.name,
            self.age,
            self.gender,
            self.spouse,
            self.parent,
        ]
        .into_iter()
        .max()
        .map_or(0, |m| m + 1)
        .max(MIN_CELLS)
    }

    /// Map one row. `None` for rows too short to be voter rows.
    pub fn record(&self, leaf: &Leaf, cells: &[String]) -> Option<VoterRecord> {
        if cells.len() < self.required_width() {
            return None;
        }
        let cell = |i: usize| cells.get(i).cloned().unwrap_or_default();
        Some(VoterRecord {
            district: leaf.district().to_string(),
            municipality: leaf.municipality().to_string(),
            ward: leaf.ward().to_string(),
            polling_centre: leaf.centre().to_string(),
            voter_id: cell(self.voter_id),
            name: cell(self.name),
            age: cell(self.age),
            gender: cell(self.gender),
            spouse_name: cell(self.spouse),
            parent_name: cell(self.parent),
            mother_name: self.mother.map(cell).unwrap_or_default(),
        })
    }
}

/// Map every body row of `table` for `leaf`, dropping malformed rows.
pub fn map_rows(leaf: &Leaf, table: &ParsedTable) -> LeafResult {
    let columns = ColumnMap::resolve(&table.headers);
    let records: Vec<VoterRecord> = table
        .rows
        .iter()
        .filter_map(|cells| columns.record(leaf, cells))
        .collect();
    LeafResult {
        rows_seen: table.rows.len(),
        records,
        timed_out: false,
    }
}

#[derive(Debug, Clone)]
pub struct Extractor {
    selectors: FormSelectors,
    settle: SettlePolicy,
    table_timeout: Duration,
}

impl Extractor {
    pub fn new(selectors: FormSelectors, settle: SettlePolicy, table_timeout: Duration) -> Self {
        Self {
            selectors,
            settle,
            table_timeout,
        }
    }

    /// Extract the leaf currently selected on the page.
    ///
    /// A table that never attaches is reported as an empty, `timed_out`
    /// result rather than an error.
    pub async fn extract<S: SessionDriver + ?Sized>(
        &self,
        session: &mut S,
        leaf: &Leaf,
    ) -> Result<LeafResult, CrawlError> {
        self.submit(session).await?;

        let table = &self.selectors.result_table;
        match session.wait_for_selector(table, self.table_timeout).await {
            Ok(()) => {}
            Err(SessionError::Timeout { .. }) => {
                warn!(
                    "[{}] result table did not attach within {:?}",
                    leaf, self.table_timeout
                );
                return Ok(LeafResult::timed_out());
            }
            Err(e) => return Err(e.into()),
        }

        self.show_all_rows(session).await;

        let html = session.table_html(table).await?.unwrap_or_default();
        let parsed = parse_table(&html);
        let result = map_rows(leaf, &parsed);

        let dropped = result.rows_seen - result.len();
        if dropped > 0 {
            debug!("[{}] dropped {} malformed row(s)", leaf, dropped);
        }
        info!("[{}] {} record(s)", leaf, result.len());
        Ok(result)
    }

    async fn submit<S: SessionDriver + ?Sized>(&self, session: &mut S) -> Result<(), CrawlError> {
        for selector in &self.selectors.submit {
            if session.click(selector).await? {
                debug!("submitted via {}", selector);
                return Ok(());
            }
        }
        Err(CrawlError::NoSubmitControl)
    }

    /// Best effort: a widget without a page-size control just shows what it has.
    async fn show_all_rows<S: SessionDriver + ?Sized>(&self, session: &mut S) {
        match session.expand_page_size(&self.selectors.page_size).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("no page-size control, reading visible rows");
                return;
            }
            Err(e) => {
                warn!("page-size expansion failed: {}", e);
                return;
            }
        }

        match self.settle.mode {
            SettleMode::Fixed => self.settle.after_page_size().await,
            SettleMode::Poll => {
                let table = &self.selectors.result_table;
                let mut watch = self.settle.row_watch();
                loop {
                    let count = session.row_count(table).await.ok();
                    if watch.observe(count) {
                        break;
                    }
                    watch.pause().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{HierarchyNode, Level, SelectionPath};
    use crate::test_utils::{voter_row, MockRegistry, MockSession};

    fn leaf() -> Leaf {
        let path = SelectionPath::from_nodes([
            HierarchyNode::new(Level::State, "3", "Bagmati").unwrap(),
            HierarchyNode::new(Level::District, "28", "Lalitpur").unwrap(),
            HierarchyNode::new(Level::Municipality, "5", "Lalitpur Metro").unwrap(),
            HierarchyNode::new(Level::Ward, "1", "1").unwrap(),
        ])
        .unwrap();
        Leaf {
            path,
            centre: HierarchyNode::new(Level::Centre, "9", "School A").unwrap(),
        }
    }

    fn strings(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_fixed_columns_map_eight_and_nine_cell_rows() {
        let table = ParsedTable {
            headers: Vec::new(),
            rows: vec![
                strings(&["1", "x", "V001", "Ram", "40", "M", "Sita", "Hari"]),
                strings(&["2", "x", "V002", "Sita", "38", "F", "Ram", "Gopal", "Maya"]),
                strings(&["3", "x", "V003", "Short", "22", "F", "Ram"]),
            ],
        };
        let result = map_rows(&leaf(), &table);
        assert_eq!(result.rows_seen, 3);
        assert_eq!(result.len(), 2);

        let first = &result.records[0];
        assert_eq!(first.voter_id, "V001");
        assert_eq!(first.name, "Ram");
        assert_eq!(first.age, "40");
        assert_eq!(first.gender, "M");
        assert_eq!(first.spouse_name, "Sita");
        assert_eq!(first.parent_name, "Hari");
        assert_eq!(first.mother_name, "");
        assert_eq!(first.district, "Lalitpur");
        assert_eq!(first.polling_centre, "School A");

        assert_eq!(result.records[1].mother_name, "Maya");
    }

    #[test]
    fn test_header_map_wins_over_fixed_positions() {
        let headers = strings(&[
            "S.N.",
            "Voter No",
            "Name",
            "Age",
            "Gender",
            "Spouse Name",
            "Father/Mother Name",
            "Action",
        ]);
        let map = ColumnMap::from_headers(&headers).unwrap();
        assert_eq!(map.voter_id, 1);
        assert_eq!(map.name, 2);
        assert_eq!(map.spouse, 5);
        assert_eq!(map.parent, 6);
        assert_eq!(map.mother, None);

        let table = ParsedTable {
            headers,
            rows: vec![strings(&["1", "V010", "Hari", "51", "M", "Gita", "Shyam", "view"])],
        };
        let result = map_rows(&leaf(), &table);
        assert_eq!(result.records[0].voter_id, "V010");
        assert_eq!(result.records[0].parent_name, "Shyam");
    }

    #[test]
    fn test_unrecognised_header_falls_back() {
        let headers = strings(&["a", "b", "c"]);
        assert_eq!(ColumnMap::resolve(&headers), ColumnMap::default());
    }

    #[test]
    fn test_parse_table_trims_cells() {
        let html = r#"<table id="tbl_data"><thead><tr><th> Name </th></tr></thead>
            <tbody><tr><td>  a  </td><td>b
            c</td></tr><tr><td colspan="9">No data</td></tr></tbody></table>"#;
        let parsed = parse_table(html);
        assert_eq!(parsed.headers, vec!["Name"]);
        assert_eq!(parsed.rows[0], vec!["a", "b c"]);
        assert_eq!(parsed.rows[1].len(), 1);
    }

    fn extractor() -> Extractor {
        Extractor::new(
            FormSelectors::default(),
            SettlePolicy::immediate(),
            Duration::from_millis(50),
        )
    }

    async fn at_leaf(reg: MockRegistry) -> MockSession {
        let mut s = MockSession::new(reg);
        let sel = FormSelectors::default();
        s.navigate("http://portal", Duration::from_secs(1)).await.unwrap();
        for (control, value) in [
            (&sel.state, "3"),
            (&sel.district, "28"),
            (&sel.municipality, "5"),
            (&sel.ward, "1"),
            (&sel.centre, "9"),
        ] {
            s.select_option(control, value).await.unwrap();
        }
        s
    }

    fn registry(rows: Vec<Vec<String>>) -> MockRegistry {
        MockRegistry::new()
            .options(&[], &[("3", "Bagmati")])
            .options(&["3"], &[("28", "Lalitpur")])
            .options(&["3", "28"], &[("5", "Lalitpur Metro")])
            .options(&["3", "28", "5"], &[("1", "1")])
            .options(&["3", "28", "5", "1"], &[("9", "School A")])
            .table(&["3", "28", "5", "1", "9"], rows)
    }

    #[tokio::test]
    async fn test_page_size_is_forced_before_reading() {
        let rows = (0..25).map(|i| voter_row(&format!("V{i:03}"), 9)).collect();
        let mut s = at_leaf(registry(rows)).await;
        let result = extractor().extract(&mut s, &leaf()).await.unwrap();
        assert_eq!(result.len(), 25);
        assert_eq!(s.stats.page_size_expansions, 1);
        assert_eq!(s.stats.table_reads, 1);
    }

    #[tokio::test]
    async fn test_poll_mode_reads_every_row() {
        let rows = (0..40).map(|i| voter_row(&format!("V{i:03}"), 8)).collect();
        let mut s = at_leaf(registry(rows)).await;
        let ex = Extractor::new(
            FormSelectors::default(),
            SettlePolicy {
                mode: SettleMode::Poll,
                poll_interval: Duration::from_millis(1),
                poll_quiet: Duration::from_millis(3),
                poll_max: Duration::from_secs(1),
                ..SettlePolicy::immediate()
            },
            Duration::from_millis(50),
        );
        let result = ex.extract(&mut s, &leaf()).await.unwrap();
        assert_eq!(result.len(), 40);
    }

    #[tokio::test]
    async fn test_without_page_size_control_reads_visible_rows() {
        let rows = (0..25).map(|i| voter_row(&format!("V{i:03}"), 9)).collect();
        let mut s = at_leaf(registry(rows)).await;
        s.has_page_size_control = false;
        let result = extractor().extract(&mut s, &leaf()).await.unwrap();
        assert_eq!(result.len(), 10);
    }

    #[tokio::test]
    async fn test_table_never_attaching_is_empty_not_error() {
        let reg = registry(vec![voter_row("V001", 9)]);
        let mut s = at_leaf(reg).await.never_attach_table(&["3", "28", "5", "1", "9"]);
        let result = extractor().extract(&mut s, &leaf()).await.unwrap();
        assert!(result.timed_out);
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_fallback_submit_selector() {
        let mut s = at_leaf(registry(vec![voter_row("V001", 9)])).await;
        s.submit_selector = Some("input[type='submit']".to_string());
        let result = extractor().extract(&mut s, &leaf()).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(s.stats.submits, 1);
    }

    #[tokio::test]
    async fn test_missing_submit_control() {
        let mut s = at_leaf(registry(vec![voter_row("V001", 9)])).await;
        s.submit_selector = None;
        let err = extractor().extract(&mut s, &leaf()).await.unwrap_err();
        assert!(matches!(err, CrawlError::NoSubmitControl));
    }
}
