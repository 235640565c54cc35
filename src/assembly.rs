//! Assembly enrichment: looks up NCBI assemblies built from the loaded
//! samples and hangs them off the matching study and sample nodes.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{info, warn};

use crate::cypher::GraphFragment;
use crate::domain::{NodeLabel, PropValue, Props, Rel};
use crate::entrez::{EntrezClient, EntrezSearch};
use crate::error::SraGraphError;
use crate::graph::{GraphStore, NodeRecord, PropertyPatch, SampleContext};
use crate::pipeline::{CancelToken, Consumed, PipelineReport, PipelineSettings, Stages, run_pipeline};
use crate::progress::ProgressSink;
use crate::xml::{XmlElement, parse_document};

const SAMPLE_SCAN_PAGE: usize = 10_000;

/// Summary fields that are either extracted separately or not kept.
const SKIPPED_FIELDS: [&str; 9] = [
    "Meta",
    "GB_BioProjects",
    "RS_BioProjects",
    "BioSampleAccn",
    "Biosource",
    "GB_Projects",
    "RS_Projects",
    "PropertyList",
    "Synonym",
];

#[derive(Debug, Clone, PartialEq)]
pub struct AssemblySummary {
    /// BioSample accession the assembly was built from.
    pub sample: String,
    /// GenBank BioProject accession.
    pub project: Option<String>,
    pub strain: Option<String>,
    pub stats: Vec<Props>,
    pub attributes: Props,
}

/// Extracts one `DocumentSummary` of the assembly database.
pub fn parse_summary(summary: &XmlElement) -> Result<AssemblySummary, SraGraphError> {
    let sample = summary
        .child("BioSampleAccn")
        .and_then(XmlElement::text)
        .map(str::trim)
        .unwrap_or_default()
        .to_string();
    if sample.is_empty() {
        let accession = summary
            .child("AssemblyAccession")
            .and_then(XmlElement::text)
            .unwrap_or("?");
        return Err(SraGraphError::MalformedRecord(format!(
            "assembly {accession} has no BioSampleAccn"
        )));
    }

    let mut attributes: Props = summary
        .children
        .iter()
        .filter(|field| !SKIPPED_FIELDS.contains(&field.tag.as_str()) && !field.has_children())
        .filter_map(|field| {
            field
                .text()
                .map(|text| (field.tag.clone(), PropValue::from(text.trim())))
        })
        .collect();

    if let Some(refseq) = first_bioproject(summary, "RS_BioProjects") {
        attributes.insert("RS_BioProjectAccn".to_string(), refseq.into());
    }

    let strain = summary
        .find_all("Biosource/InfraspeciesList/Infraspecie")
        .into_iter()
        .filter(|entry| entry.child("Sub_type").and_then(XmlElement::text) == Some("strain"))
        .filter_map(|entry| entry.child("Sub_value").and_then(XmlElement::text))
        .last()
        .map(|strain| strain.trim().to_string());

    Ok(AssemblySummary {
        sample,
        project: first_bioproject(summary, "GB_BioProjects"),
        strain,
        stats: parse_meta_stats(summary.child("Meta").and_then(XmlElement::text)),
        attributes,
    })
}

fn first_bioproject(summary: &XmlElement, field: &str) -> Option<String> {
    summary
        .child(field)
        .and_then(XmlElement::first_child)
        .and_then(|project| project.child("BioprojectAccn"))
        .and_then(XmlElement::text)
        .map(|accession| accession.trim().to_string())
}

/// `Meta` holds an escaped XML fragment without a single root.
fn parse_meta_stats(meta: Option<&str>) -> Vec<Props> {
    let Some(meta) = meta else {
        return Vec::new();
    };
    let tree = match parse_document(&format!("<root>{meta}</root>")) {
        Ok(tree) => tree,
        Err(err) => {
            warn!("unreadable assembly Meta block: {err}");
            return Vec::new();
        }
    };
    tree.find_all("Stats/Stat")
        .into_iter()
        .map(|stat| {
            let mut props = stat.attr_props();
            if let Some(value) = stat.text() {
                props.insert("value".to_string(), value.trim().into());
            }
            props
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    pub patches: Vec<PropertyPatch>,
    pub project_replaced: bool,
    pub strain_replaced: bool,
}

/// Overwrites study alias and attribute strain when no loaded context agrees
/// with the assembly record. Previous values move to `sra_alias` and `sra_strain`.
pub fn reconcile(contexts: &[SampleContext], summary: &AssemblySummary) -> Reconciliation {
    let mut patched: BTreeMap<i64, Props> = BTreeMap::new();

    let project = summary.project.as_deref().filter(|project| !project.is_empty());
    let project_replaced = project.is_some_and(|project| {
        contexts
            .iter()
            .all(|context| !same_value(context.study.str_prop("alias"), project))
    });
    if let (true, Some(project)) = (project_replaced, project) {
        for context in contexts {
            replace_keeping_old(&mut patched, &context.study, "alias", "sra_alias", project);
        }
    }

    let strain = summary.strain.as_deref().filter(|strain| !strain.is_empty());
    let strain_replaced = strain.is_some_and(|strain| {
        contexts
            .iter()
            .all(|context| !same_value(context.attrib.str_prop("strain"), strain))
    });
    if let (true, Some(strain)) = (strain_replaced, strain) {
        for context in contexts {
            replace_keeping_old(&mut patched, &context.attrib, "strain", "sra_strain", strain);
        }
    }

    Reconciliation {
        patches: patched
            .into_iter()
            .map(|(id, props)| PropertyPatch { id, props })
            .collect(),
        project_replaced,
        strain_replaced,
    }
}

/// Stored values may already have been lowercased by a repair pass.
fn same_value(stored: Option<&str>, wanted: &str) -> bool {
    stored.is_some_and(|stored| stored.eq_ignore_ascii_case(wanted))
}

fn replace_keeping_old(
    patched: &mut BTreeMap<i64, Props>,
    node: &NodeRecord,
    key: &str,
    backup: &str,
    value: &str,
) {
    let props = patched.entry(node.id).or_insert_with(|| node.props.clone());
    if let Some(old) = node.props.get(key) {
        props.insert(backup.to_string(), old.clone());
    }
    props.insert(key.to_string(), value.into());
}

/// Assembly and stats nodes linked from every given study and sample.
pub fn assembly_fragment(
    studies: &[i64],
    samples: &[i64],
    summary: &AssemblySummary,
) -> Result<GraphFragment, SraGraphError> {
    let mut fragment = GraphFragment::new();
    for (i, id) in studies.iter().enumerate() {
        fragment.bind(format!("stu{i}"), *id)?;
    }
    for (i, id) in samples.iter().enumerate() {
        fragment.bind(format!("sam{i}"), *id)?;
    }
    fragment.node("ably", NodeLabel::Assembly, summary.attributes.clone())?;
    for (z, stat) in summary.stats.iter().enumerate() {
        let var = format!("sta{z}");
        fragment.node(var.clone(), NodeLabel::AssemblyStats, stat.clone())?;
        fragment.relate("ably", Rel::HasStats, &var)?;
    }
    for i in 0..studies.len() {
        fragment.merge_relation(&format!("stu{i}"), Rel::HasAssembly, "ably")?;
    }
    for i in 0..samples.len() {
        fragment.merge_relation(&format!("sam{i}"), Rel::HasAssembly, "ably")?;
    }
    Ok(fragment)
}

pub struct AssemblyStages<'a, E, G> {
    entrez: &'a E,
    store: &'a G,
    search: EntrezSearch,
}

impl<'a, E: EntrezClient, G: GraphStore> AssemblyStages<'a, E, G> {
    pub fn new(entrez: &'a E, store: &'a G, samples: &[String]) -> Self {
        Self {
            entrez,
            store,
            search: EntrezSearch::assemblies_for_samples(samples),
        }
    }

    fn attach(&self, summary: &AssemblySummary) -> Result<Consumed, SraGraphError> {
        let Some(project) = summary.project.as_deref() else {
            warn!(sample = %summary.sample, "assembly without GenBank BioProject");
            return Ok(Consumed::Skipped);
        };
        let mut contexts = self.store.sample_contexts(&summary.sample)?;
        if contexts.is_empty() {
            contexts = self
                .store
                .sample_contexts(&summary.sample.to_lowercase())?;
        }
        if contexts.is_empty() {
            warn!(sample = %summary.sample, "no loaded study/sample for assembly");
            return Ok(Consumed::Skipped);
        }

        let reconciliation = reconcile(&contexts, summary);
        if !reconciliation.patches.is_empty() {
            info!(
                sample = %summary.sample,
                project = reconciliation.project_replaced,
                strain = reconciliation.strain_replaced,
                "assembly disagrees with SRA record, replacing"
            );
            self.store.replace_properties(&reconciliation.patches)?;
        }

        let mut studies = BTreeSet::new();
        let mut samples = BTreeSet::new();
        for context in &contexts {
            if reconciliation.project_replaced || same_value(context.study.str_prop("alias"), project) {
                studies.insert(context.study.id);
                samples.insert(context.sample.id);
            }
        }
        let studies: Vec<i64> = studies.into_iter().collect();
        let samples: Vec<i64> = samples.into_iter().collect();
        let fragment = assembly_fragment(&studies, &samples, summary)?;
        self.store.write_fragment(&fragment)?;
        Ok(Consumed::Written)
    }
}

impl<E: EntrezClient, G: GraphStore> Stages for AssemblyStages<'_, E, G> {
    type Record = AssemblySummary;

    fn count(&self) -> Result<u64, SraGraphError> {
        self.entrez.search_count(&self.search)
    }

    fn list_ids(&self, retstart: u64, retmax: usize) -> Result<Vec<String>, SraGraphError> {
        self.entrez.search_ids(&self.search, retstart, retmax)
    }

    fn fetch(&self, ids: &[String]) -> Result<Vec<AssemblySummary>, SraGraphError> {
        let summaries = self.entrez.fetch_assembly_summaries(ids)?;
        Ok(summaries
            .iter()
            .filter_map(|summary| match parse_summary(summary) {
                Ok(parsed) => Some(parsed),
                Err(err) => {
                    warn!("skipping assembly summary: {err}");
                    None
                }
            })
            .collect())
    }

    fn consume(&self, record: AssemblySummary, _seq: i64) -> Result<Consumed, SraGraphError> {
        self.attach(&record)
    }
}

/// External ids of every loaded sample, sorted and deduplicated.
pub fn loaded_sample_ids<G: GraphStore>(store: &G) -> Result<Vec<String>, SraGraphError> {
    let mut ids = BTreeSet::new();
    let mut skip = 0;
    loop {
        let page = store.scan_nodes(Some(NodeLabel::Sample), skip, SAMPLE_SCAN_PAGE)?;
        let fetched = page.len();
        ids.extend(
            page.iter()
                .filter_map(|sample| sample.str_prop("EXTERNAL_ID"))
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string),
        );
        if fetched < SAMPLE_SCAN_PAGE {
            break;
        }
        skip += fetched;
    }
    Ok(ids.into_iter().collect())
}

/// Runs the assembly lookup for all loaded samples.
pub fn enrich_assemblies<E: EntrezClient, G: GraphStore>(
    entrez: &E,
    store: &G,
    settings: &PipelineSettings,
    cancel: &CancelToken,
    sink: &dyn ProgressSink,
) -> Result<PipelineReport, SraGraphError> {
    let samples = loaded_sample_ids(store)?;
    if samples.is_empty() {
        info!("no samples loaded, skipping assembly lookup");
        return Ok(PipelineReport {
            total: 0,
            consumed: 0,
            skipped: 0,
            first_seq: settings.start_seq,
            next_seq: settings.start_seq,
        });
    }
    info!(samples = samples.len(), "fetching assembly metadata");
    let stages = AssemblyStages::new(entrez, store, &samples);
    run_pipeline(&stages, settings, cancel, sink)
}
