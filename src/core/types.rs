use serde::{Deserialize, Serialize};
use std::fmt;

/// One level of the cascading registry form, in selection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    State,
    District,
    Municipality,
    Ward,
    Centre,
}

impl Level {
    /// Levels that make up a persisted `SelectionPath` (Centre is applied at extraction time).
    pub const PATH_LEVELS: [Level; 4] = [
        Level::State,
        Level::District,
        Level::Municipality,
        Level::Ward,
    ];

    pub fn depth(self) -> usize {
        match self {
            Level::State => 0,
            Level::District => 1,
            Level::Municipality => 2,
            Level::Ward => 3,
            Level::Centre => 4,
        }
    }

    pub fn child(self) -> Option<Level> {
        match self {
            Level::State => Some(Level::District),
            Level::District => Some(Level::Municipality),
            Level::Municipality => Some(Level::Ward),
            Level::Ward => Some(Level::Centre),
            Level::Centre => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Level::State => "state",
            Level::District => "district",
            Level::Municipality => "municipality",
            Level::Ward => "ward",
            Level::Centre => "centre",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A discovered option of one form control.
///
/// `value` is only unique among siblings; the parent relation lives in the
/// traversal frame that produced the node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HierarchyNode {
    pub level: Level,
    pub value: String,
    pub label: String,
}

impl HierarchyNode {
    /// Returns `None` for placeholder entries (empty value).
    pub fn new(level: Level, value: impl Into<String>, label: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return None;
        }
        Some(Self {
            level,
            value,
            label: label.into().trim().to_string(),
        })
    }
}

/// Error returned when a `SelectionPath` would stop being prefix-consistent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathOrderError {
    pub expected: Option<Level>,
    pub got: Level,
}

impl fmt::Display for PathOrderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.expected {
            Some(l) => write!(f, "expected a {} node, got {}", l, self.got),
            None => write!(f, "path is already complete, cannot push {}", self.got),
        }
    }
}

impl std::error::Error for PathOrderError {}

/// Ordered chain of selections from State down to (at most) Ward.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionPath {
    nodes: Vec<HierarchyNode>,
}

impl SelectionPath {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a path from nodes given in State → Ward order.
    pub fn from_nodes(
        nodes: impl IntoIterator<Item = HierarchyNode>,
    ) -> Result<Self, PathOrderError> {
        let mut path = Self::new();
        for node in nodes {
            path.push(node)?;
        }
        Ok(path)
    }

    pub fn next_level(&self) -> Option<Level> {
        Level::PATH_LEVELS.get(self.nodes.len()).copied()
    }

    pub fn push(&mut self, node: HierarchyNode) -> Result<(), PathOrderError> {
        let expected = self.next_level();
        if expected != Some(node.level) {
            return Err(PathOrderError {
                expected,
                got: node.level,
            });
        }
        self.nodes.push(node);
        Ok(())
    }

    /// Returns a copy extended by `node`.
    pub fn child(&self, node: HierarchyNode) -> Result<Self, PathOrderError> {
        let mut next = self.clone();
        next.push(node)?;
        Ok(next)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[HierarchyNode] {
        &self.nodes
    }

    pub fn get(&self, level: Level) -> Option<&HierarchyNode> {
        self.nodes.get(level.depth())
    }

    /// Number of leading levels whose values match `other`.
    pub fn common_prefix_len(&self, other: &SelectionPath) -> usize {
        self.nodes
            .iter()
            .zip(other.nodes.iter())
            .take_while(|(a, b)| a.level == b.level && a.value == b.value)
            .count()
    }

    pub fn label(&self, level: Level) -> &str {
        self.get(level).map(|n| n.label.as_str()).unwrap_or("")
    }
}

impl fmt::Display for SelectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels: Vec<&str> = self.nodes.iter().map(|n| n.label.as_str()).collect();
        f.write_str(&labels.join(" -> "))
    }
}

/// A fully specified extraction unit: a complete path plus the terminal centre.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leaf {
    pub path: SelectionPath,
    pub centre: HierarchyNode,
}

impl Leaf {
    pub fn district(&self) -> &str {
        self.path.label(Level::District)
    }

    pub fn municipality(&self) -> &str {
        self.path.label(Level::Municipality)
    }

    pub fn ward(&self) -> &str {
        self.path.label(Level::Ward)
    }

    pub fn centre(&self) -> &str {
        &self.centre.label
    }
}

impl fmt::Display for Leaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} -> Ward {} -> {}",
            self.district(),
            self.municipality(),
            self.ward(),
            self.centre()
        )
    }
}

/// One row of the result table with its location context denormalized in.
///
/// `age` stays raw text: the registry emits placeholders for unknown ages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterRecord {
    #[serde(rename = "District")]
    pub district: String,
    #[serde(rename = "Municipality")]
    pub municipality: String,
    #[serde(rename = "Ward No")]
    pub ward: String,
    #[serde(rename = "Polling Centre")]
    pub polling_centre: String,
    #[serde(rename = "Voter ID")]
    pub voter_id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Age")]
    pub age: String,
    #[serde(rename = "Gender")]
    pub gender: String,
    #[serde(rename = "Spouse Name")]
    pub spouse_name: String,
    #[serde(rename = "Parent Name")]
    pub parent_name: String,
    #[serde(rename = "Mother Name")]
    pub mother_name: String,
}

/// Every record harvested for one leaf. Handed to the sink once, then dropped.
#[derive(Debug, Clone, Default)]
pub struct LeafResult {
    pub records: Vec<VoterRecord>,
    /// Raw body rows read, including malformed rows that were dropped.
    pub rows_seen: usize,
    /// The result table never attached within the timeout.
    pub timed_out: bool,
}

impl LeafResult {
    pub fn timed_out() -> Self {
        Self {
            timed_out: true,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(level: Level, value: &str) -> HierarchyNode {
        HierarchyNode::new(level, value, format!("label-{value}")).unwrap()
    }

    #[test]
    fn test_placeholder_nodes_are_rejected() {
        assert!(HierarchyNode::new(Level::Ward, "", "-- select --").is_none());
        assert!(HierarchyNode::new(Level::Ward, "  ", "blank").is_none());
        let n = HierarchyNode::new(Level::Ward, "7", "  7 ").unwrap();
        assert_eq!(n.label, "7");
    }

    #[test]
    fn test_path_must_be_prefix_consistent() {
        let mut path = SelectionPath::new();
        let err = path.push(node(Level::District, "28")).unwrap_err();
        assert_eq!(err.expected, Some(Level::State));

        path.push(node(Level::State, "3")).unwrap();
        path.push(node(Level::District, "28")).unwrap();
        assert_eq!(path.next_level(), Some(Level::Municipality));
        assert!(path.push(node(Level::Ward, "1")).is_err());
    }

    #[test]
    fn test_complete_path_refuses_centre() {
        let path = SelectionPath::from_nodes([
            node(Level::State, "3"),
            node(Level::District, "28"),
            node(Level::Municipality, "5"),
            node(Level::Ward, "1"),
        ])
        .unwrap();
        assert_eq!(path.next_level(), None);
        let err = path.child(node(Level::Centre, "10")).unwrap_err();
        assert_eq!(err.expected, None);
    }

    #[test]
    fn test_common_prefix_len() {
        let a = SelectionPath::from_nodes([
            node(Level::State, "3"),
            node(Level::District, "28"),
            node(Level::Municipality, "5"),
        ])
        .unwrap();
        let b = SelectionPath::from_nodes([
            node(Level::State, "3"),
            node(Level::District, "28"),
            node(Level::Municipality, "6"),
        ])
        .unwrap();
        assert_eq!(a.common_prefix_len(&b), 2);
        assert_eq!(a.common_prefix_len(&a), 3);
        assert_eq!(a.common_prefix_len(&SelectionPath::new()), 0);
    }
}
