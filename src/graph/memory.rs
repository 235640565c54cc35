use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use crate::cypher::{GraphFragment, GraphOp};
use crate::domain::{EXP_PKG, Identity, NodeLabel, Props, Rel};
use crate::error::SraGraphError;
use crate::graph::{GraphStore, NodeRecord, PropertyPatch, SampleContext};

#[derive(Debug, Clone)]
struct StoredNode {
    label: NodeLabel,
    props: Props,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredEdge {
    pub from: i64,
    pub rel: String,
    pub to: i64,
    pub props: Props,
}

#[derive(Debug, Clone, Copy)]
struct Mark {
    next_id: i64,
    edges: usize,
}

#[derive(Debug, Clone, Default)]
struct State {
    next_id: i64,
    nodes: BTreeMap<i64, StoredNode>,
    edges: Vec<StoredEdge>,
}

impl State {
    fn insert_node(&mut self, label: NodeLabel, props: Props) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        self.nodes.insert(id, StoredNode { label, props });
        id
    }

    /// Merge matches any node of the label carrying all requested properties.
    fn find_merge_target(&self, label: NodeLabel, props: &Props) -> Option<i64> {
        self.nodes
            .iter()
            .find(|(_, node)| node.label == label && contains_all(&node.props, props))
            .map(|(id, _)| *id)
    }

    fn mark(&self) -> Mark {
        Mark {
            next_id: self.next_id,
            edges: self.edges.len(),
        }
    }

    /// Drops everything added since `mark`. Fragments only add nodes and
    /// edges, so this restores the earlier state.
    fn rollback(&mut self, mark: Mark) {
        self.edges.truncate(mark.edges);
        let _ = self.nodes.split_off(&mark.next_id);
        self.next_id = mark.next_id;
    }

    fn linked(&self, a: i64, b: i64) -> bool {
        self.edges
            .iter()
            .any(|edge| (edge.from == a && edge.to == b) || (edge.from == b && edge.to == a))
    }

    fn record(&self, id: i64) -> Option<NodeRecord> {
        self.nodes.get(&id).map(|node| NodeRecord {
            id,
            labels: vec![node.label.as_str().to_string()],
            props: node.props.clone(),
        })
    }

    fn neighbours(&self, id: i64, label: NodeLabel) -> Vec<i64> {
        let mut found: Vec<i64> = self
            .edges
            .iter()
            .filter_map(|edge| {
                if edge.from == id {
                    Some(edge.to)
                } else if edge.to == id {
                    Some(edge.from)
                } else {
                    None
                }
            })
            .filter(|other| {
                self.nodes
                    .get(other)
                    .is_some_and(|node| node.label == label)
            })
            .collect();
        found.sort_unstable();
        found.dedup();
        found
    }

    fn apply(&mut self, fragment: &GraphFragment) -> Result<(), SraGraphError> {
        let mut vars: HashMap<&str, i64> = HashMap::new();
        for op in fragment.ops() {
            match op {
                GraphOp::Bind { var, id } => {
                    if !self.nodes.contains_key(id) {
                        return Err(SraGraphError::GraphResponse(format!(
                            "bound node {id} no longer exists, nothing was written"
                        )));
                    }
                    vars.insert(var.as_str(), *id);
                }
                GraphOp::Node {
                    var,
                    label,
                    props,
                    identity,
                } => {
                    let id = match identity {
                        Identity::Fresh => self.insert_node(*label, props.clone()),
                        Identity::MergeByAttributes => self
                            .find_merge_target(*label, props)
                            .unwrap_or_else(|| self.insert_node(*label, props.clone())),
                    };
                    vars.insert(var.as_str(), id);
                }
                GraphOp::Relate {
                    from,
                    rel,
                    to,
                    props,
                    merge,
                } => {
                    let lookup = |var: &str| {
                        vars.get(var)
                            .copied()
                            .ok_or_else(|| SraGraphError::UndefinedVariable(var.to_string()))
                    };
                    let (from, to) = (lookup(from.as_str())?, lookup(to.as_str())?);
                    let exists = *merge
                        && self.edges.iter().any(|edge| {
                            edge.from == from
                                && edge.to == to
                                && edge.rel == rel.as_str()
                                && contains_all(&edge.props, props)
                        });
                    if !exists {
                        self.edges.push(StoredEdge {
                            from,
                            rel: rel.as_str().to_string(),
                            to,
                            props: props.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

fn contains_all(stored: &Props, wanted: &Props) -> bool {
    wanted
        .iter()
        .all(|(key, value)| stored.get(key) == Some(value))
}

/// In-process graph used for dry runs and tests.
///
/// A fragment that fails part way is rolled back, so each fragment is
/// all-or-nothing like a store transaction.
#[derive(Debug, Default)]
pub struct MemoryGraph {
    state: Mutex<State>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn nodes_with_label(&self, label: NodeLabel) -> Vec<NodeRecord> {
        let state = self.lock();
        state
            .nodes
            .iter()
            .filter(|(_, node)| node.label == label)
            .filter_map(|(id, _)| state.record(*id))
            .collect()
    }

    pub fn edges(&self) -> Vec<StoredEdge> {
        self.lock().edges.clone()
    }

    /// Edges of type `rel` pointing at node `id`.
    pub fn incoming(&self, id: i64, rel: Rel) -> Vec<StoredEdge> {
        self.lock()
            .edges
            .iter()
            .filter(|edge| edge.to == id && edge.rel == rel.as_str())
            .cloned()
            .collect()
    }

    pub fn outgoing(&self, id: i64, rel: Rel) -> Vec<StoredEdge> {
        self.lock()
            .edges
            .iter()
            .filter(|edge| edge.from == id && edge.rel == rel.as_str())
            .cloned()
            .collect()
    }

    /// Inserts a node directly, bypassing identity rules.
    pub fn insert_node(&self, label: NodeLabel, props: Props) -> i64 {
        self.lock().insert_node(label, props)
    }
}

impl GraphStore for MemoryGraph {
    fn write_fragment(&self, fragment: &GraphFragment) -> Result<(), SraGraphError> {
        let mut state = self.lock();
        let mark = state.mark();
        let result = state.apply(fragment);
        if result.is_err() {
            state.rollback(mark);
        }
        result
    }

    fn scan_nodes(
        &self,
        label: Option<NodeLabel>,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<NodeRecord>, SraGraphError> {
        let state = self.lock();
        Ok(state
            .nodes
            .iter()
            .filter(|(_, node)| label.is_none_or(|label| node.label == label))
            .skip(skip)
            .take(limit)
            .filter_map(|(id, _)| state.record(*id))
            .collect())
    }

    fn replace_properties(&self, patches: &[PropertyPatch]) -> Result<(), SraGraphError> {
        let mut state = self.lock();
        for patch in patches {
            if let Some(node) = state.nodes.get_mut(&patch.id) {
                node.props = patch.props.clone();
            }
        }
        Ok(())
    }

    fn unlinked_pairs(
        &self,
        owner: NodeLabel,
        target: NodeLabel,
    ) -> Result<Vec<(i64, i64)>, SraGraphError> {
        let state = self.lock();
        let with_label = |label: NodeLabel| {
            state
                .nodes
                .iter()
                .filter(move |(_, node)| node.label == label)
                .filter_map(|(id, node)| node.props.get(EXP_PKG).map(|pkg| (*id, pkg)))
                .collect::<Vec<_>>()
        };
        let targets = with_label(target);
        let mut pairs = Vec::new();
        for (owner_id, owner_pkg) in with_label(owner) {
            for (target_id, target_pkg) in &targets {
                if owner_pkg == *target_pkg && !state.linked(owner_id, *target_id) {
                    pairs.push((owner_id, *target_id));
                }
            }
        }
        Ok(pairs)
    }

    fn create_relationships(&self, rel: Rel, pairs: &[(i64, i64)]) -> Result<(), SraGraphError> {
        let mut state = self.lock();
        for (from, to) in pairs {
            if state.nodes.contains_key(from) && state.nodes.contains_key(to) {
                state.edges.push(StoredEdge {
                    from: *from,
                    rel: rel.as_str().to_string(),
                    to: *to,
                    props: Props::new(),
                });
            }
        }
        Ok(())
    }

    fn sample_contexts(&self, external_id: &str) -> Result<Vec<SampleContext>, SraGraphError> {
        let state = self.lock();
        let mut contexts = Vec::new();
        for (sample_id, sample) in &state.nodes {
            let matches = sample.label == NodeLabel::Sample
                && sample.props.get("EXTERNAL_ID").and_then(|id| id.as_str()) == Some(external_id);
            if !matches {
                continue;
            }
            for study_id in state.neighbours(*sample_id, NodeLabel::Study) {
                for attrib_id in state.neighbours(*sample_id, NodeLabel::SampleAttrib) {
                    if let (Some(study), Some(sample), Some(attrib)) = (
                        state.record(study_id),
                        state.record(*sample_id),
                        state.record(attrib_id),
                    ) {
                        contexts.push(SampleContext {
                            study,
                            sample,
                            attrib,
                        });
                    }
                }
            }
        }
        Ok(contexts)
    }

    fn count_nodes(&self) -> Result<u64, SraGraphError> {
        Ok(self.lock().nodes.len() as u64)
    }

    fn count_relationships(&self) -> Result<u64, SraGraphError> {
        Ok(self.lock().edges.len() as u64)
    }

    fn clear(&self) -> Result<(), SraGraphError> {
        *self.lock() = State::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PropValue;

    fn props(pairs: &[(&str, &str)]) -> Props {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), PropValue::from(*value)))
            .collect()
    }

    #[test]
    fn failed_fragment_leaves_store_untouched() {
        let graph = MemoryGraph::new();
        let mut fragment = GraphFragment::new();
        fragment
            .node("run0", NodeLabel::Run, props(&[("accession", "SRR1")]))
            .unwrap();
        fragment.bind("gone", 99).unwrap();
        fragment.relate("run0", Rel::HasBases, "gone").unwrap();

        assert!(matches!(
            graph.write_fragment(&fragment),
            Err(SraGraphError::GraphResponse(_))
        ));
        assert_eq!(graph.count_nodes().unwrap(), 0);
    }

    #[test]
    fn rollback_keeps_earlier_fragments() {
        let graph = MemoryGraph::new();
        let mut first = GraphFragment::new();
        first
            .node("inst", NodeLabel::Platform, props(&[("type", "ILLUMINA")]))
            .unwrap();
        first
            .node("run0", NodeLabel::Run, props(&[("accession", "SRR1")]))
            .unwrap();
        first.relate("run0", Rel::UsingInstrument, "inst").unwrap();
        graph.write_fragment(&first).unwrap();

        let mut failing = GraphFragment::new();
        failing
            .node("inst", NodeLabel::Platform, props(&[("type", "ILLUMINA")]))
            .unwrap();
        failing
            .node("run1", NodeLabel::Run, props(&[("accession", "SRR2")]))
            .unwrap();
        failing.relate("run1", Rel::UsingInstrument, "inst").unwrap();
        failing.bind("gone", 99).unwrap();
        failing.relate("run1", Rel::HasBases, "gone").unwrap();
        assert!(graph.write_fragment(&failing).is_err());

        assert_eq!(graph.count_nodes().unwrap(), 2);
        assert_eq!(graph.count_relationships().unwrap(), 1);
        let mut next = GraphFragment::new();
        next.node("run2", NodeLabel::Run, props(&[("accession", "SRR3")]))
            .unwrap();
        graph.write_fragment(&next).unwrap();
        let ids: Vec<i64> = graph
            .nodes_with_label(NodeLabel::Run)
            .iter()
            .map(|node| node.id)
            .collect();
        assert_eq!(ids, [1, 2]);
    }

    #[test]
    fn platform_without_attributes_is_not_merged() {
        let graph = MemoryGraph::new();
        for _ in 0..2 {
            let mut fragment = GraphFragment::new();
            fragment.node("inst", NodeLabel::Platform, Props::new()).unwrap();
            graph.write_fragment(&fragment).unwrap();
        }
        assert_eq!(graph.nodes_with_label(NodeLabel::Platform).len(), 2);
    }

    #[test]
    fn merge_reuses_node_with_same_attributes() {
        let graph = MemoryGraph::new();
        for _ in 0..2 {
            let mut fragment = GraphFragment::new();
            fragment
                .node("inst", NodeLabel::Platform, props(&[("type", "ILLUMINA")]))
                .unwrap();
            graph.write_fragment(&fragment).unwrap();
        }
        assert_eq!(graph.nodes_with_label(NodeLabel::Platform).len(), 1);
    }
}
