use tracing::debug;

use crate::core::types::{HierarchyNode, Level};
use crate::scraping::session::SessionDriver;

/// Read the current candidate set of `control` as nodes of `level`.
///
/// Reflects the live DOM, so callers must have waited for any repopulation
/// triggered by selecting an ancestor. Placeholder entries (empty value) are
/// dropped. An absent or unpopulated control, or a driver error, yields an
/// empty list: there is simply nothing to traverse.
pub async fn discover<S: SessionDriver + ?Sized>(
    session: &mut S,
    control: &str,
    level: Level,
) -> Vec<HierarchyNode> {
    let raw = match session.read_options(control).await {
        Ok(raw) => raw,
        Err(e) => {
            debug!("discover {}: {} (treating as empty)", control, e);
            return Vec::new();
        }
    };

    let nodes: Vec<HierarchyNode> = raw
        .into_iter()
        .filter_map(|o| HierarchyNode::new(level, o.value, o.label))
        .collect();

    debug!("discover {}: {} {} option(s)", control, nodes.len(), level);
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::FormSelectors;
    use crate::test_utils::{MockRegistry, MockSession};
    use std::time::Duration;

    #[tokio::test]
    async fn test_discover_filters_placeholders() {
        let reg = MockRegistry::new().options(
            &[],
            &[("3", "Bagmati"), ("", "blank"), ("4", " Gandaki ")],
        );
        let mut s = MockSession::new(reg);
        s.navigate("http://portal", Duration::from_secs(1)).await.unwrap();

        let nodes = discover(&mut s, &FormSelectors::default().state, Level::State).await;
        let labels: Vec<&str> = nodes.iter().map(|n| n.label.as_str()).collect();
        assert_eq!(labels, vec!["Bagmati", "Gandaki"]);
        assert!(nodes.iter().all(|n| n.level == Level::State));
    }

    #[tokio::test]
    async fn test_discover_missing_control_is_empty() {
        let mut s = MockSession::new(MockRegistry::new());
        let nodes = discover(&mut s, "select#nope", Level::Ward).await;
        assert!(nodes.is_empty());
    }

    #[tokio::test]
    async fn test_discover_before_parent_selected_is_empty() {
        let reg = MockRegistry::uniform([2, 2, 1, 1, 1], 0);
        let mut s = MockSession::new(reg);
        s.navigate("http://portal", Duration::from_secs(1)).await.unwrap();
        let nodes = discover(&mut s, &FormSelectors::default().district, Level::District).await;
        assert!(nodes.is_empty());
    }
}
