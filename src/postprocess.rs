//! Integrity check and repair passes run over the whole graph after a load.
//!
//! Repairs read nodes page by page and write full property replacements,
//! so each step is idempotent and can be rerun after a failure.

use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::{IntegerRule, PostprocessSettings};
use crate::date::{DateNormalizer, UNKNOWN};
use crate::domain::{NodeLabel, PropValue, Props, Rel, gc_ratio};
use crate::error::SraGraphError;
use crate::geo::{GEO_LOC_NAME, is_well_formed, normalize_geo_loc_name};
use crate::graph::{GraphStore, NodeRecord, PropertyPatch};
use crate::pipeline::CancelToken;
use crate::progress::{ProgressEvent, ProgressSink, Stage};

const GC_RATIO: &str = "GC_Ratio";

/// One verdict per predicate. The graph is trusted only when all hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub design_read_links: bool,
    pub run_read_links: bool,
    pub integers: bool,
    pub gc_ratios: bool,
    pub sentinels_removed: bool,
    pub aliases_unified: bool,
    pub geo_loc_names: bool,
}

impl IntegrityReport {
    pub fn passed(&self) -> bool {
        self.design_read_links
            && self.run_read_links
            && self.integers
            && self.gc_ratios
            && self.sentinels_removed
            && self.aliases_unified
            && self.geo_loc_names
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairStep {
    Relationships,
    Assemblies,
    Integers,
    GcRatios,
    Lowercase,
    Sentinels,
    Aliases,
    GeoLocNames,
    Dates,
}

impl RepairStep {
    pub const ORDER: [RepairStep; 9] = [
        RepairStep::Relationships,
        RepairStep::Assemblies,
        RepairStep::Integers,
        RepairStep::GcRatios,
        RepairStep::Lowercase,
        RepairStep::Sentinels,
        RepairStep::Aliases,
        RepairStep::GeoLocNames,
        RepairStep::Dates,
    ];

    fn status(self) -> &'static str {
        match self {
            RepairStep::Relationships => "Create missing relationships",
            RepairStep::Assemblies => "Set assembly data",
            RepairStep::Integers => "Set integers",
            RepairStep::GcRatios => "Set gc-ratios",
            RepairStep::Lowercase => "Set lowercase",
            RepairStep::Sentinels => "Delete 'unknown' values",
            RepairStep::Aliases => "Replace similar properties",
            RepairStep::GeoLocNames => "Fix geo location name",
            RepairStep::Dates => "Clean dates",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    pub step: RepairStep,
    /// Nodes or relationships written by the step.
    pub changed: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub steps: Vec<StepOutcome>,
}

impl RepairReport {
    pub fn success(&self) -> bool {
        self.steps.iter().all(|step| step.error.is_none())
    }
}

pub struct Postprocessor<'a, G> {
    store: &'a G,
    settings: &'a PostprocessSettings,
    dates: DateNormalizer,
}

impl<'a, G: GraphStore> Postprocessor<'a, G> {
    pub fn new(store: &'a G, settings: &'a PostprocessSettings) -> Self {
        Self {
            store,
            settings,
            dates: DateNormalizer::new(),
        }
    }

    pub fn with_dates(mut self, dates: DateNormalizer) -> Self {
        self.dates = dates;
        self
    }

    pub fn check(&self) -> Result<IntegrityReport, SraGraphError> {
        let design_read_links = self
            .store
            .unlinked_pairs(NodeLabel::Design, NodeLabel::Read)?
            .is_empty();
        let run_read_links = self
            .store
            .unlinked_pairs(NodeLabel::Run, NodeLabel::Read)?
            .is_empty();

        let mut report = IntegrityReport {
            design_read_links,
            run_read_links,
            integers: true,
            gc_ratios: true,
            sentinels_removed: true,
            aliases_unified: true,
            geo_loc_names: true,
        };
        self.for_each_page(None, |page| {
            for node in page {
                report.integers &= self.integers_typed(node);
                report.gc_ratios &= !node.has_label(NodeLabel::Bases) || node.props.contains_key(GC_RATIO);
                report.sentinels_removed &= !node
                    .props
                    .values()
                    .any(|value| self.is_sentinel(value));
                report.aliases_unified &= !self.settings.aliases.iter().any(|rule| {
                    node.has_label(rule.label) && node.props.contains_key(&rule.from)
                });
                if node.has_label(NodeLabel::SampleAttrib) {
                    report.geo_loc_names &= node
                        .str_prop(GEO_LOC_NAME)
                        .is_none_or(is_well_formed);
                }
            }
            Ok(Vec::new())
        })?;
        if !report.passed() {
            warn!(?report, "integrity check failed");
        }
        Ok(report)
    }

    /// Runs every repair step in order. A failing step is logged and the pass
    /// continues. Cancellation stops before the next step.
    pub fn repair<F>(
        &self,
        enrich_assemblies: F,
        cancel: &CancelToken,
        sink: &dyn ProgressSink,
    ) -> RepairReport
    where
        F: FnOnce() -> Result<u64, SraGraphError>,
    {
        let mut enrich = Some(enrich_assemblies);
        let total = RepairStep::ORDER.len() as u64;
        let mut steps = Vec::with_capacity(RepairStep::ORDER.len());
        for (done, step) in RepairStep::ORDER.into_iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(?step, "repair cancelled");
                break;
            }
            sink.event(ProgressEvent::Status {
                message: format!("PostProcessing: {}", step.status()),
            });
            let result = match step {
                RepairStep::Assemblies => match enrich.take() {
                    Some(enrich) => enrich(),
                    None => Ok(0),
                },
                other => self.run_step(other),
            };
            let outcome = match result {
                Ok(changed) => {
                    info!(?step, changed, "repair step done");
                    StepOutcome {
                        step,
                        changed,
                        error: None,
                    }
                }
                Err(err) => {
                    error!(?step, "repair step failed: {err}");
                    StepOutcome {
                        step,
                        changed: 0,
                        error: Some(err.to_string()),
                    }
                }
            };
            steps.push(outcome);
            sink.event(ProgressEvent::Stage {
                stage: Stage::Postprocess,
                completed: done as u64 + 1,
                total,
            });
        }
        RepairReport { steps }
    }

    pub fn run_step(&self, step: RepairStep) -> Result<u64, SraGraphError> {
        match step {
            RepairStep::Relationships => self.create_missing_relationships(),
            RepairStep::Assemblies => Ok(0),
            RepairStep::Integers => self.set_integers(),
            RepairStep::GcRatios => self.set_gc_ratios(),
            RepairStep::Lowercase => self.set_lowercase(),
            RepairStep::Sentinels => self.delete_sentinels(),
            RepairStep::Aliases => self.replace_aliases(),
            RepairStep::GeoLocNames => self.fix_geo_loc_names(),
            RepairStep::Dates => self.clean_dates(),
        }
    }

    pub fn create_missing_relationships(&self) -> Result<u64, SraGraphError> {
        let mut created = 0;
        let mut failure = None;
        for (owner, rel) in [
            (NodeLabel::Design, Rel::HasRead),
            (NodeLabel::Run, Rel::ReadStatistics),
        ] {
            let pairs = self.store.unlinked_pairs(owner, NodeLabel::Read)?;
            for chunk in pairs.chunks(self.settings.batch_size.max(1)) {
                match self.store.create_relationships(rel, chunk) {
                    Ok(()) => created += chunk.len() as u64,
                    Err(err) => {
                        error!(%rel, pairs = chunk.len(), "relationship batch failed: {err}");
                        failure.get_or_insert(err);
                    }
                }
            }
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(created),
        }
    }

    pub fn set_integers(&self) -> Result<u64, SraGraphError> {
        self.rewrite(None, |node| {
            let mut props = node.props.clone();
            let mut changed = false;
            for rule in self.integer_rules_for(node) {
                for key in &rule.properties {
                    let Some(value) = props.get(key) else {
                        continue;
                    };
                    if matches!(value, PropValue::Int(_)) {
                        continue;
                    }
                    match to_integer(value) {
                        Some(number) => {
                            props.insert(key.clone(), PropValue::Int(number));
                            changed = true;
                        }
                        None => warn!(id = node.id, key, %value, "not an integer"),
                    }
                }
            }
            changed.then_some(props)
        })
    }

    pub fn set_gc_ratios(&self) -> Result<u64, SraGraphError> {
        self.rewrite(Some(NodeLabel::Bases), |node| {
            let Some(ratio) = gc_ratio(&node.props) else {
                warn!(id = node.id, "bases without usable count");
                return None;
            };
            if node.props.get(GC_RATIO) == Some(&PropValue::Float(ratio)) {
                return None;
            }
            let mut props = node.props.clone();
            props.insert(GC_RATIO.to_string(), PropValue::Float(ratio));
            Some(props)
        })
    }

    /// Lowercases string values except on file-link nodes, whose URLs and paths keep their case.
    pub fn set_lowercase(&self) -> Result<u64, SraGraphError> {
        self.rewrite(None, |node| {
            if is_file_link(node) {
                return None;
            }
            let mut changed = false;
            let props: Props = node
                .props
                .iter()
                .map(|(key, value)| match value {
                    PropValue::Str(text) if text.chars().any(char::is_uppercase) => {
                        changed = true;
                        (key.clone(), PropValue::Str(text.to_lowercase()))
                    }
                    other => (key.clone(), other.clone()),
                })
                .collect();
            changed.then_some(props)
        })
    }

    pub fn delete_sentinels(&self) -> Result<u64, SraGraphError> {
        self.rewrite(None, |node| {
            let props: Props = node
                .props
                .iter()
                .filter(|(_, value)| !self.is_sentinel(value))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            (props.len() != node.props.len()).then_some(props)
        })
    }

    pub fn replace_aliases(&self) -> Result<u64, SraGraphError> {
        self.rewrite(None, |node| {
            let mut props = node.props.clone();
            let mut changed = false;
            for rule in &self.settings.aliases {
                if !node.has_label(rule.label) {
                    continue;
                }
                if let Some(value) = props.remove(&rule.from) {
                    props.insert(rule.to.clone(), value);
                    changed = true;
                }
            }
            changed.then_some(props)
        })
    }

    pub fn fix_geo_loc_names(&self) -> Result<u64, SraGraphError> {
        self.rewrite(Some(NodeLabel::SampleAttrib), |node| {
            let current = node.str_prop(GEO_LOC_NAME)?;
            let fixed = normalize_geo_loc_name(current);
            if fixed == current {
                return None;
            }
            let mut props = node.props.clone();
            props.insert(GEO_LOC_NAME.to_string(), fixed.into());
            Some(props)
        })
    }

    /// Rewrites configured date properties to `yyyy-mm-dd`. Unparseable dates are removed.
    pub fn clean_dates(&self) -> Result<u64, SraGraphError> {
        let mut changed = 0;
        let mut failure = None;
        for rule in &self.settings.dates {
            let result = self.rewrite(Some(rule.label), |node| {
                let mut props = node.props.clone();
                let mut touched = false;
                for key in &rule.properties {
                    let Some(raw) = node.props.get(key) else {
                        continue;
                    };
                    let clean = self.dates.normalize_or_unknown(&raw.to_string());
                    if clean == UNKNOWN {
                        props.remove(key);
                        touched = true;
                    } else if raw.as_str() != Some(clean.as_str()) {
                        props.insert(key.clone(), clean.into());
                        touched = true;
                    }
                }
                touched.then_some(props)
            });
            match result {
                Ok(count) => changed += count,
                Err(err) => {
                    failure.get_or_insert(err);
                }
            }
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(changed),
        }
    }

    fn is_sentinel(&self, value: &PropValue) -> bool {
        value
            .as_str()
            .is_some_and(|text| self.settings.delete_values.iter().any(|sentinel| sentinel == text))
    }

    fn integer_rules_for<'r>(&'r self, node: &'r NodeRecord) -> impl Iterator<Item = &'r IntegerRule> {
        self.settings
            .integers
            .iter()
            .filter(move |rule| rule.label.is_none_or(|label| node.has_label(label)))
    }

    fn integers_typed(&self, node: &NodeRecord) -> bool {
        self.integer_rules_for(node).all(|rule| {
            rule.properties.iter().all(|key| match node.props.get(key) {
                None | Some(PropValue::Int(_)) => true,
                Some(PropValue::Str(text)) => text.is_empty(),
                Some(_) => false,
            })
        })
    }

    /// Applies `fix` to every node of `label` and writes back the nodes it changed.
    fn rewrite(
        &self,
        label: Option<NodeLabel>,
        mut fix: impl FnMut(&NodeRecord) -> Option<Props>,
    ) -> Result<u64, SraGraphError> {
        self.for_each_page(label, |page| {
            Ok(page
                .iter()
                .filter_map(|node| fix(node).map(|props| PropertyPatch { id: node.id, props }))
                .collect())
        })
    }

    /// Pages through nodes in id order, writing the patches each page yields.
    ///
    /// A failed page write is logged and the remaining pages are still
    /// written; the first failure is returned at the end. Returns the number
    /// of patched nodes.
    fn for_each_page(
        &self,
        label: Option<NodeLabel>,
        mut visit: impl FnMut(&[NodeRecord]) -> Result<Vec<PropertyPatch>, SraGraphError>,
    ) -> Result<u64, SraGraphError> {
        let limit = self.settings.batch_size.max(1);
        let mut skip = 0;
        let mut written = 0;
        let mut failure = None;
        loop {
            let page = self.store.scan_nodes(label, skip, limit)?;
            let patches = visit(&page)?;
            if !patches.is_empty() {
                match self.store.replace_properties(&patches) {
                    Ok(()) => written += patches.len() as u64,
                    Err(err) => {
                        error!(skip, nodes = patches.len(), "page write failed: {err}");
                        failure.get_or_insert(err);
                    }
                }
            }
            if page.len() < limit {
                break;
            }
            skip += page.len();
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(written),
        }
    }
}

fn is_file_link(node: &NodeRecord) -> bool {
    node.labels
        .iter()
        .filter_map(|label| label.parse::<NodeLabel>().ok())
        .any(NodeLabel::is_file_link)
}

/// Integer coercion of a stored value: plain integers, or decimals truncated.
fn to_integer(value: &PropValue) -> Option<i64> {
    match value {
        PropValue::Int(number) => Some(*number),
        PropValue::Float(number) if number.is_finite() => Some(number.trunc() as i64),
        PropValue::Float(_) | PropValue::Bool(_) | PropValue::List(_) => None,
        PropValue::Str(text) => {
            let text = text.trim();
            text.parse::<i64>().ok().or_else(|| {
                text.parse::<f64>()
                    .ok()
                    .filter(|number| number.is_finite())
                    .map(|number| number.trunc() as i64)
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_coercion() {
        assert_eq!(to_integer(&PropValue::from("42")), Some(42));
        assert_eq!(to_integer(&PropValue::from(" 7 ")), Some(7));
        assert_eq!(to_integer(&PropValue::from("3.9")), Some(3));
        assert_eq!(to_integer(&PropValue::Float(2.5)), Some(2));
        assert_eq!(to_integer(&PropValue::from("lots")), None);
    }

    #[test]
    fn report_passes_only_when_all_hold() {
        let mut report = IntegrityReport {
            design_read_links: true,
            run_read_links: true,
            integers: true,
            gc_ratios: true,
            sentinels_removed: true,
            aliases_unified: true,
            geo_loc_names: true,
        };
        assert!(report.passed());
        report.geo_loc_names = false;
        assert!(!report.passed());
    }
}
