//! Attaching engine results to the node they belong to.

use tracing::debug;

use crate::analysis::AnalysisResult;
use crate::tree::{GameTree, NodeId};

/// Attach `result` to the node it was computed for, provided that node is
/// `active`, its parent, or one of its children. Returns the node the
/// result went to; anything else is stale and dropped.
pub fn route(tree: &mut GameTree, active: NodeId, result: AnalysisResult) -> Option<NodeId> {
    let owner = result.node_id()?;
    let target = if owner == active {
        Some(active)
    } else if tree.parent(active).ok().flatten() == Some(owner) {
        Some(owner)
    } else if tree.children(active).is_ok_and(|c| c.contains(&owner)) {
        Some(owner)
    } else {
        None
    };

    let Some(target) = target else {
        debug!("dropping stale result {}", result.id);
        return None;
    };
    match tree.receive_analysis(target, result) {
        Ok(()) => Some(target),
        Err(e) => {
            debug!("could not attach result: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{MoveInfo, RootInfo};
    use crate::board::Point;
    use crate::constants::{SCORE_KEY, WINRATE_KEY};

    fn result_for(node: NodeId) -> AnalysisResult {
        AnalysisResult {
            id: format!("{node}:1"),
            move_infos: vec![MoveInfo {
                mv: "D4".into(),
                visits: 10,
                winrate: 0.5312,
                ..MoveInfo::default()
            }],
            root_info: Some(RootInfo {
                visits: 10,
                winrate: 0.5312,
                score_lead: 1.26,
            }),
            ..AnalysisResult::default()
        }
    }

    fn line() -> (GameTree, Vec<NodeId>) {
        let mut tree = GameTree::new(9, 9, 7.5, "chinese").unwrap();
        let mut nodes = vec![tree.root()];
        for x in 0..4 {
            let n = tree.apply_move(*nodes.last().unwrap(), Point::new(x, 4)).unwrap();
            nodes.push(n);
        }
        (tree, nodes)
    }

    #[test]
    fn test_route_to_active_parent_and_child() {
        let (mut tree, n) = line();
        assert_eq!(route(&mut tree, n[2], result_for(n[2])), Some(n[2]));
        assert_eq!(route(&mut tree, n[2], result_for(n[1])), Some(n[1]));
        assert_eq!(route(&mut tree, n[2], result_for(n[3])), Some(n[3]));
        assert!(tree.has_valid_analysis(n[1]));
        assert!(tree.has_valid_analysis(n[3]));
    }

    #[test]
    fn test_stale_results_dropped() {
        let (mut tree, n) = line();
        assert_eq!(route(&mut tree, n[2], result_for(n[0])), None);
        assert_eq!(route(&mut tree, n[2], result_for(n[4])), None);
        let bogus = AnalysisResult {
            id: "terminate:3".into(),
            ..result_for(n[2])
        };
        assert_eq!(route(&mut tree, n[2], bogus), None);
        assert!(tree.node(n[0]).unwrap().analysis().is_none());
    }

    #[test]
    fn test_detached_node_result_dropped() {
        let (mut tree, n) = line();
        tree.detach(n[3]).unwrap();
        assert_eq!(route(&mut tree, n[2], result_for(n[3])), None);
    }

    #[test]
    fn test_score_properties() {
        let (mut tree, n) = line();
        route(&mut tree, n[1], result_for(n[1]));
        let node = tree.node(n[1]).unwrap();
        assert_eq!(node.get(WINRATE_KEY), Some("53.12"));
        assert_eq!(node.get(SCORE_KEY), Some("1.3"));

        let partial = AnalysisResult {
            root_info: None,
            ..result_for(n[2])
        };
        route(&mut tree, n[2], partial);
        let node = tree.node(n[2]).unwrap();
        assert!(node.analysis().is_some());
        assert!(!node.has_key(WINRATE_KEY));
    }
}
