use flowcore::{EdgeId, NodeId, Workflow};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};
use petgraph::Direction;
use std::collections::{HashMap, HashSet};

/// Directed graph view of a workflow's nodes and edges.
///
/// Building never fails: edges whose endpoints do not exist are left out
/// (the validator reports them separately) and duplicate node ids keep
/// their first occurrence.
pub struct WorkflowGraph {
    graph: DiGraph<NodeId, EdgeId>,
    indices: HashMap<NodeId, NodeIndex>,
}

impl WorkflowGraph {
    pub fn build(workflow: &Workflow) -> Self {
        let mut graph = DiGraph::new();
        let mut indices = HashMap::new();

        for node in &workflow.nodes {
            if !indices.contains_key(&node.id) {
                let idx = graph.add_node(node.id.clone());
                indices.insert(node.id.clone(), idx);
            }
        }

        for edge in &workflow.edges {
            if let (Some(from), Some(to)) = (indices.get(&edge.source), indices.get(&edge.target)) {
                graph.add_edge(*from, *to, edge.id.clone());
            }
        }

        Self { graph, indices }
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.indices.contains_key(node_id)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn predecessors(&self, node_id: &str) -> Vec<&NodeId> {
        self.neighbors(node_id, Direction::Incoming)
    }

    pub fn successors(&self, node_id: &str) -> Vec<&NodeId> {
        self.neighbors(node_id, Direction::Outgoing)
    }

    fn neighbors(&self, node_id: &str, direction: Direction) -> Vec<&NodeId> {
        let Some(idx) = self.indices.get(node_id) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        self.graph
            .neighbors_directed(*idx, direction)
            .filter(|n| seen.insert(*n))
            .map(|n| &self.graph[n])
            .collect()
    }

    /// Every node with a path to `node_id`, excluding the node itself
    pub fn ancestors(&self, node_id: &str) -> HashSet<NodeId> {
        let Some(&start) = self.indices.get(node_id) else {
            return HashSet::new();
        };
        let reversed = Reversed(&self.graph);
        let mut dfs = Dfs::new(reversed, start);
        let mut found = HashSet::new();
        while let Some(idx) = dfs.next(reversed) {
            if idx != start {
                found.insert(self.graph[idx].clone());
            }
        }
        found
    }

    /// Every node reachable from `node_id`, including the node itself
    pub fn reachable_from(&self, node_id: &str) -> HashSet<NodeId> {
        let Some(&start) = self.indices.get(node_id) else {
            return HashSet::new();
        };
        let mut dfs = Dfs::new(&self.graph, start);
        let mut found = HashSet::new();
        while let Some(idx) = dfs.next(&self.graph) {
            found.insert(self.graph[idx].clone());
        }
        found
    }

    /// Depth-first search with an in-progress marker set. Returns the node
    /// a back edge points at, which closes the first cycle found.
    ///
    /// Roots are visited in workflow order so the result is deterministic.
    pub fn find_cycle(&self) -> Option<NodeId> {
        let mut done = HashSet::new();
        let mut in_progress = HashSet::new();

        for root in self.graph.node_indices() {
            if done.contains(&root) {
                continue;
            }
            if let Some(idx) = self.visit(root, &mut in_progress, &mut done) {
                return Some(self.graph[idx].clone());
            }
        }
        None
    }

    fn visit(
        &self,
        idx: NodeIndex,
        in_progress: &mut HashSet<NodeIndex>,
        done: &mut HashSet<NodeIndex>,
    ) -> Option<NodeIndex> {
        in_progress.insert(idx);

        let mut next: Vec<_> = self.graph.neighbors(idx).collect();
        next.sort();
        next.dedup();

        for succ in next {
            if in_progress.contains(&succ) {
                return Some(succ);
            }
            if !done.contains(&succ) {
                if let Some(found) = self.visit(succ, in_progress, done) {
                    return Some(found);
                }
            }
        }

        in_progress.remove(&idx);
        done.insert(idx);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowcore::{TriggerConfig, WorkflowNode};

    fn chain() -> Workflow {
        let mut wf = Workflow::new("chain", TriggerConfig::Manual);
        for id in ["t", "a", "b", "c"] {
            wf.add_node(WorkflowNode::new(id, "send-email"));
        }
        wf.connect("t", "out", "a", "in");
        wf.connect("a", "out", "b", "in");
        wf.connect("t", "out", "c", "in");
        wf
    }

    #[test]
    fn ancestors_follow_edges_backwards() {
        let graph = WorkflowGraph::build(&chain());
        let ancestors = graph.ancestors("b");
        assert_eq!(ancestors, HashSet::from(["a".to_string(), "t".to_string()]));
        assert!(graph.ancestors("t").is_empty());
    }

    #[test]
    fn reachability_includes_start() {
        let graph = WorkflowGraph::build(&chain());
        assert_eq!(graph.reachable_from("a").len(), 2);
        assert_eq!(graph.reachable_from("t").len(), 4);
    }

    #[test]
    fn cycle_reports_reentered_node() {
        let mut wf = chain();
        wf.connect("b", "out", "a", "in2");
        let graph = WorkflowGraph::build(&wf);
        assert_eq!(graph.find_cycle(), Some("a".to_string()));
        assert_eq!(WorkflowGraph::build(&chain()).find_cycle(), None);
    }

    #[test]
    fn dangling_edges_are_ignored() {
        let mut wf = chain();
        wf.connect("a", "out", "ghost", "in");
        let graph = WorkflowGraph::build(&wf);
        assert_eq!(graph.successors("a").len(), 1);
    }
}
