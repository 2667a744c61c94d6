//! DAG validation — run before a workflow's nodes/edges are hashed and
//! persisted.
//!
//! Rules enforced:
//! 1. Node identities must be unique within the workflow.
//! 2. Every edge must reference nodes that exist in the workflow.
//! 3. The directed graph must be acyclic (topological sort must succeed).
//!
//! Returns the nodes in topological bind order on success.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::{models::DagDefinition, EngineError};

pub fn validate_dag(dag: &DagDefinition) -> Result<Vec<String>, EngineError> {
    let mut seen_ids: HashSet<&str> = HashSet::new();
    for node in &dag.nodes {
        if !seen_ids.insert(node.as_str()) {
            return Err(EngineError::DuplicateNodeId(node.clone()));
        }
    }

    let node_set: HashSet<&str> = dag.nodes.iter().map(|n| n.as_str()).collect();

    for edge in &dag.edges {
        if !node_set.contains(edge.from.as_str()) {
            return Err(EngineError::UnknownNodeReference {
                node_id: edge.from.clone(),
                side: "from",
            });
        }
        if !node_set.contains(edge.to.as_str()) {
            return Err(EngineError::UnknownNodeReference {
                node_id: edge.to.clone(),
                side: "to",
            });
        }
    }

    // Kahn's algorithm.
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut in_degree: HashMap<&str, usize> = HashMap::new();

    for node in &dag.nodes {
        adjacency.entry(node.as_str()).or_default();
        in_degree.entry(node.as_str()).or_insert(0);
    }

    for edge in &dag.edges {
        adjacency
            .entry(edge.from.as_str())
            .or_default()
            .push(edge.to.as_str());
        *in_degree.entry(edge.to.as_str()).or_insert(0) += 1;
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(&id, _)| id)
        .collect();

    let mut sorted: Vec<String> = Vec::with_capacity(dag.nodes.len());

    while let Some(node_id) = queue.pop_front() {
        sorted.push(node_id.to_owned());

        if let Some(neighbours) = adjacency.get(node_id) {
            for &neighbour in neighbours {
                let deg = in_degree.entry(neighbour).or_insert(0);
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(neighbour);
                }
            }
        }
    }

    if sorted.len() != dag.nodes.len() {
        return Err(EngineError::CycleDetected);
    }

    Ok(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EdgeDefinition;

    fn make_dag(nodes: Vec<&str>, edges: Vec<(&str, &str)>) -> DagDefinition {
        DagDefinition {
            nodes: nodes.into_iter().map(str::to_owned).collect(),
            edges: edges
                .into_iter()
                .map(|(from, to)| EdgeDefinition { from: from.into(), to: to.into() })
                .collect(),
        }
    }

    #[test]
    fn valid_linear_dag_returns_sorted_order() {
        let dag = make_dag(vec!["a", "b", "c"], vec![("a", "b"), ("b", "c")]);
        let sorted = validate_dag(&dag).expect("should be valid");
        assert_eq!(sorted, vec!["a", "b", "c"]);
    }

    #[test]
    fn valid_diamond_dag() {
        let dag = make_dag(
            vec!["a", "b", "c", "d"],
            vec![("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
        );
        let sorted = validate_dag(&dag).expect("should be valid");
        assert_eq!(sorted.first().unwrap(), "a");
        assert_eq!(sorted.last().unwrap(), "d");
        assert_eq!(sorted.len(), 4);
    }

    #[test]
    fn duplicate_node_id_is_rejected() {
        let dag = make_dag(vec!["a", "a"], vec![]);
        assert!(matches!(
            validate_dag(&dag),
            Err(EngineError::DuplicateNodeId(id)) if id == "a"
        ));
    }

    #[test]
    fn edge_referencing_missing_node_is_rejected() {
        let dag = make_dag(vec!["a"], vec![("a", "ghost")]);
        assert!(matches!(
            validate_dag(&dag),
            Err(EngineError::UnknownNodeReference { node_id, .. }) if node_id == "ghost"
        ));
    }

    #[test]
    fn cycle_is_detected() {
        let dag = make_dag(vec!["a", "b", "c"], vec![("a", "b"), ("b", "c"), ("c", "a")]);
        assert!(matches!(validate_dag(&dag), Err(EngineError::CycleDetected)));
    }

    #[test]
    fn self_dependency_is_rejected_as_a_cycle() {
        let dag = make_dag(vec!["a"], vec![("a", "a")]);
        assert!(matches!(validate_dag(&dag), Err(EngineError::CycleDetected)));
    }

    #[test]
    fn single_node_no_edges_is_valid() {
        let dag = make_dag(vec!["solo"], vec![]);
        let sorted = validate_dag(&dag).expect("single node should be valid");
        assert_eq!(sorted, vec!["solo"]);
    }
}
