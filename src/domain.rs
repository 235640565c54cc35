use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SraGraphError;

/// Property key carrying the package sequence number.
pub const EXP_PKG: &str = "exp_pkg";

/// How repeated occurrences of a node kind are reconciled across records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    /// A new node for every occurrence.
    Fresh,
    /// Reuse a node with an identical property set, create one otherwise.
    MergeByAttributes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeLabel {
    Experiment,
    Design,
    Library,
    SpotDescriptor,
    Read,
    Basecall,
    Platform,
    Submission,
    Organization,
    Study,
    Sample,
    SampleAttrib,
    Member,
    Run,
    RunAttrib,
    SraFile,
    CloudFile,
    Bases,
    Assembly,
    AssemblyStats,
}

impl NodeLabel {
    pub const ALL: [NodeLabel; 20] = [
        NodeLabel::Experiment,
        NodeLabel::Design,
        NodeLabel::Library,
        NodeLabel::SpotDescriptor,
        NodeLabel::Read,
        NodeLabel::Basecall,
        NodeLabel::Platform,
        NodeLabel::Submission,
        NodeLabel::Organization,
        NodeLabel::Study,
        NodeLabel::Sample,
        NodeLabel::SampleAttrib,
        NodeLabel::Member,
        NodeLabel::Run,
        NodeLabel::RunAttrib,
        NodeLabel::SraFile,
        NodeLabel::CloudFile,
        NodeLabel::Bases,
        NodeLabel::Assembly,
        NodeLabel::AssemblyStats,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NodeLabel::Experiment => "experiment",
            NodeLabel::Design => "design",
            NodeLabel::Library => "library",
            NodeLabel::SpotDescriptor => "spot_descriptor",
            NodeLabel::Read => "read",
            NodeLabel::Basecall => "basecall",
            NodeLabel::Platform => "platform",
            NodeLabel::Submission => "submission",
            NodeLabel::Organization => "organization",
            NodeLabel::Study => "study",
            NodeLabel::Sample => "sample",
            NodeLabel::SampleAttrib => "sample_attrib",
            NodeLabel::Member => "member",
            NodeLabel::Run => "run",
            NodeLabel::RunAttrib => "run_attrib",
            NodeLabel::SraFile => "sra_file",
            NodeLabel::CloudFile => "cloud_file",
            NodeLabel::Bases => "bases",
            NodeLabel::Assembly => "assembly",
            NodeLabel::AssemblyStats => "assembly_stats",
        }
    }

    /// Identity policy table. Every label must be listed here explicitly.
    pub fn identity(self) -> Identity {
        match self {
            NodeLabel::Experiment
            | NodeLabel::Design
            | NodeLabel::Library
            | NodeLabel::SpotDescriptor
            | NodeLabel::Read
            | NodeLabel::Basecall
            | NodeLabel::Member
            | NodeLabel::Run
            | NodeLabel::RunAttrib
            | NodeLabel::SraFile
            | NodeLabel::Bases
            | NodeLabel::AssemblyStats => Identity::Fresh,
            NodeLabel::Platform
            | NodeLabel::Submission
            | NodeLabel::Organization
            | NodeLabel::Study
            | NodeLabel::Sample
            | NodeLabel::SampleAttrib
            | NodeLabel::CloudFile
            | NodeLabel::Assembly => Identity::MergeByAttributes,
        }
    }

    /// File-link kinds keep their string case (URLs, paths).
    pub fn is_file_link(self) -> bool {
        matches!(self, NodeLabel::SraFile | NodeLabel::CloudFile)
    }
}

impl fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeLabel {
    type Err = SraGraphError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        NodeLabel::ALL
            .into_iter()
            .find(|label| label.as_str() == trimmed)
            .ok_or_else(|| SraGraphError::InvalidLabel(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rel {
    UsingLibrary,
    HasSpotDescriptor,
    HasRead,
    HasBasecall,
    HasDesign,
    UsingInstrument,
    SubmittedBy,
    CarriedOutBy,
    DoneIn,
    UsedIn,
    HasSampleAttribute,
    HasPoolData,
    ReadStatistics,
    HasRun,
    HasRunAttribute,
    HasSraFile,
    HasCloudFile,
    HasBases,
    HasAssembly,
    HasStats,
}

impl Rel {
    pub fn as_str(self) -> &'static str {
        match self {
            Rel::UsingLibrary => "usingLibrary",
            Rel::HasSpotDescriptor => "hasSpotDescriptor",
            Rel::HasRead => "hasRead",
            Rel::HasBasecall => "hasBasecall",
            Rel::HasDesign => "hasDesign",
            Rel::UsingInstrument => "usingInstrument",
            Rel::SubmittedBy => "submittedBy",
            Rel::CarriedOutBy => "carriedOutBy",
            Rel::DoneIn => "doneIn",
            Rel::UsedIn => "usedIn",
            Rel::HasSampleAttribute => "hasSampleAttribute",
            Rel::HasPoolData => "hasPoolData",
            Rel::ReadStatistics => "readStatistics",
            Rel::HasRun => "hasRun",
            Rel::HasRunAttribute => "hasRunAttribute",
            Rel::HasSraFile => "hasSRAFile",
            Rel::HasCloudFile => "hasCloudFile",
            Rel::HasBases => "hasBases",
            Rel::HasAssembly => "hasAssembly",
            Rel::HasStats => "hasStats",
        }
    }
}

impl fmt::Display for Rel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Property value as stored on a node or relationship.
///
/// The mapper only produces scalars. `Bool` and `List` exist so values
/// written by other tools survive a repair rewrite unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    List(Vec<PropValue>),
}

impl PropValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Numeric view, parsing strings the way the store's `toFloat` does.
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            PropValue::Int(value) => Some(*value as f64),
            PropValue::Float(value) => Some(*value),
            PropValue::Str(value) => value.trim().parse().ok(),
            PropValue::Bool(_) | PropValue::List(_) => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, PropValue::Int(_) | PropValue::Float(_))
    }

    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => None,
            serde_json::Value::Bool(flag) => Some(PropValue::Bool(*flag)),
            serde_json::Value::Number(number) => match number.as_i64() {
                Some(int) => Some(PropValue::Int(int)),
                None => number.as_f64().map(PropValue::Float),
            },
            serde_json::Value::String(text) => Some(PropValue::Str(text.clone())),
            serde_json::Value::Array(items) => Some(PropValue::List(
                items.iter().filter_map(PropValue::from_json).collect(),
            )),
            // Not a valid property type in the store.
            serde_json::Value::Object(_) => None,
        }
    }
}

impl fmt::Display for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropValue::Int(value) => write!(f, "{value}"),
            PropValue::Float(value) => write!(f, "{value:?}"),
            PropValue::Bool(value) => write!(f, "{value}"),
            PropValue::Str(value) => f.write_str(value),
            PropValue::List(items) => {
                f.write_str("[")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        PropValue::Str(value.to_string())
    }
}

impl From<String> for PropValue {
    fn from(value: String) -> Self {
        PropValue::Str(value)
    }
}

impl From<i64> for PropValue {
    fn from(value: i64) -> Self {
        PropValue::Int(value)
    }
}

impl From<f64> for PropValue {
    fn from(value: f64) -> Self {
        PropValue::Float(value)
    }
}

/// Ordered attribute map of one node or relationship.
pub type Props = BTreeMap<String, PropValue>;

/// `(G + C) / count` over a `bases` property map. Missing base counts read as zero.
pub fn gc_ratio(props: &Props) -> Option<f64> {
    let count = props.get("count")?.to_f64()?;
    let base = |key: &str| props.get(key).and_then(PropValue::to_f64).unwrap_or(0.0);
    if count == 0.0 {
        return Some(0.0);
    }
    Some((base("G") + base("C")) / count)
}

/// Tagged attribute value before it is flattened into node properties.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Scalar(PropValue),
    List(Vec<AttrValue>),
    Map(BTreeMap<String, AttrValue>),
}

impl From<PropValue> for AttrValue {
    fn from(value: PropValue) -> Self {
        match value {
            PropValue::List(items) => AttrValue::List(items.into_iter().map(AttrValue::from).collect()),
            scalar => AttrValue::Scalar(scalar),
        }
    }
}

impl From<&Props> for AttrValue {
    fn from(props: &Props) -> Self {
        AttrValue::Map(
            props
                .iter()
                .map(|(key, value)| (key.clone(), AttrValue::from(value.clone())))
                .collect(),
        )
    }
}

/// Free-text query in Entrez syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery(String);

impl SearchQuery {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SearchQuery {
    type Err = SraGraphError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        if normalized.is_empty() {
            return Err(SraGraphError::InvalidQuery(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn every_label_round_trips_through_its_name() {
        for label in NodeLabel::ALL {
            assert_eq!(label.as_str().parse::<NodeLabel>().unwrap(), label);
        }
    }

    #[test]
    fn shared_kinds_merge() {
        assert_eq!(NodeLabel::Organization.identity(), Identity::MergeByAttributes);
        assert_eq!(NodeLabel::Platform.identity(), Identity::MergeByAttributes);
        assert_eq!(NodeLabel::Run.identity(), Identity::Fresh);
        assert_eq!(NodeLabel::Member.identity(), Identity::Fresh);
    }

    #[test]
    fn empty_query_rejected() {
        let err = "   ".parse::<SearchQuery>().unwrap_err();
        assert_matches!(err, SraGraphError::InvalidQuery(_));
    }

    #[test]
    fn gc_ratio_from_string_counts() {
        let mut props = Props::new();
        props.insert("count".to_string(), PropValue::from("200"));
        props.insert("G".to_string(), PropValue::Int(50));
        props.insert("C".to_string(), PropValue::from("30"));
        assert_eq!(gc_ratio(&props), Some(0.4));

        props.remove("count");
        assert_eq!(gc_ratio(&props), None);
    }

    #[test]
    fn float_display_keeps_decimal_point() {
        assert_eq!(PropValue::Float(1.0).to_string(), "1.0");
        assert_eq!(PropValue::Int(3).to_string(), "3");
    }
}
