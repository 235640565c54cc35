//! Access to the labeled property graph the pipeline writes into.

pub mod memory;
pub mod neo4j;

use serde::Serialize;

use crate::cypher::GraphFragment;
use crate::domain::{NodeLabel, Props, Rel};
use crate::error::SraGraphError;

pub use memory::MemoryGraph;
pub use neo4j::Neo4jHttpStore;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeRecord {
    pub id: i64,
    pub labels: Vec<String>,
    pub props: Props,
}

impl NodeRecord {
    pub fn has_label(&self, label: NodeLabel) -> bool {
        self.labels.iter().any(|name| name == label.as_str())
    }

    pub fn str_prop(&self, key: &str) -> Option<&str> {
        self.props.get(key).and_then(|value| value.as_str())
    }
}

/// Full property replacement for one node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyPatch {
    pub id: i64,
    pub props: Props,
}

/// A `study -- sample -- sample_attrib` path for one sample external id.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleContext {
    pub study: NodeRecord,
    pub sample: NodeRecord,
    pub attrib: NodeRecord,
}

pub trait GraphStore: Send + Sync {
    /// Writes one record's fragment in a single transaction.
    fn write_fragment(&self, fragment: &GraphFragment) -> Result<(), SraGraphError>;

    /// Pages through nodes ordered by id, optionally restricted to one label.
    fn scan_nodes(
        &self,
        label: Option<NodeLabel>,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<NodeRecord>, SraGraphError>;

    fn replace_properties(&self, patches: &[PropertyPatch]) -> Result<(), SraGraphError>;

    /// `(owner, target)` id pairs sharing an `exp_pkg` with no edge in either direction.
    fn unlinked_pairs(
        &self,
        owner: NodeLabel,
        target: NodeLabel,
    ) -> Result<Vec<(i64, i64)>, SraGraphError>;

    fn create_relationships(&self, rel: Rel, pairs: &[(i64, i64)]) -> Result<(), SraGraphError>;

    fn sample_contexts(&self, external_id: &str) -> Result<Vec<SampleContext>, SraGraphError>;

    fn count_nodes(&self) -> Result<u64, SraGraphError>;

    fn count_relationships(&self) -> Result<u64, SraGraphError>;

    fn clear(&self) -> Result<(), SraGraphError>;
}

impl<T: GraphStore + ?Sized> GraphStore for &T {
    fn write_fragment(&self, fragment: &GraphFragment) -> Result<(), SraGraphError> {
        (**self).write_fragment(fragment)
    }

    fn scan_nodes(
        &self,
        label: Option<NodeLabel>,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<NodeRecord>, SraGraphError> {
        (**self).scan_nodes(label, skip, limit)
    }

    fn replace_properties(&self, patches: &[PropertyPatch]) -> Result<(), SraGraphError> {
        (**self).replace_properties(patches)
    }

    fn unlinked_pairs(
        &self,
        owner: NodeLabel,
        target: NodeLabel,
    ) -> Result<Vec<(i64, i64)>, SraGraphError> {
        (**self).unlinked_pairs(owner, target)
    }

    fn create_relationships(&self, rel: Rel, pairs: &[(i64, i64)]) -> Result<(), SraGraphError> {
        (**self).create_relationships(rel, pairs)
    }

    fn sample_contexts(&self, external_id: &str) -> Result<Vec<SampleContext>, SraGraphError> {
        (**self).sample_contexts(external_id)
    }

    fn count_nodes(&self) -> Result<u64, SraGraphError> {
        (**self).count_nodes()
    }

    fn count_relationships(&self) -> Result<u64, SraGraphError> {
        (**self).count_relationships()
    }

    fn clear(&self) -> Result<(), SraGraphError> {
        (**self).clear()
    }
}
