//! Turns one `EXPERIMENT_PACKAGE` into the graph fragment written for it.
//!
//! Traversal order is fixed: design, library, spot descriptor, reads,
//! platform, experiment, then submission, organization, study, samples,
//! pool members and runs. A relationship is only added once both of its
//! endpoints exist in the fragment.

use std::collections::BTreeSet;

use tracing::warn;

use crate::cypher::GraphFragment;
use crate::domain::{EXP_PKG, NodeLabel, PropValue, Props, Rel, gc_ratio};
use crate::error::SraGraphError;
use crate::xml::XmlElement;

const EXPERIMENT: &str = "EXPERIMENT";
const SUBMISSION: &str = "SUBMISSION";
const ORGANIZATION: &str = "Organization";
const STUDY: &str = "STUDY";
const SAMPLE: &str = "SAMPLE";
const POOL: &str = "Pool";
const MEMBER: &str = "Member";
const RUN_SET: &str = "RUN_SET/RUN";
const DESIGN: &str = "DESIGN";
const LIBRARY_LAYOUT: &str = "LIBRARY_LAYOUT";
const READ_SPEC: &str = "READ_SPEC";
const READ_INDEX: &str = "READ_INDEX";
const EXPECTED_BASECALL_TABLE: &str = "EXPECTED_BASECALL_TABLE";
const EXTERNAL_ID: &str = "EXTERNAL_ID";

/// Maps a parsed experiment package tagged with sequence number `exp_pkg`.
///
/// A package without an `EXPERIMENT` element or without any `RUN` is
/// rejected as malformed. Every other gap is logged and skipped.
pub fn map_experiment_package(
    package: &XmlElement,
    exp_pkg: i64,
) -> Result<GraphFragment, SraGraphError> {
    let experiment = package
        .child(EXPERIMENT)
        .ok_or_else(|| SraGraphError::MalformedRecord("no EXPERIMENT element".to_string()))?;
    let runs = package.find_all(RUN_SET);
    if runs.is_empty() {
        let accession = experiment.attr("accession").unwrap_or("?");
        return Err(SraGraphError::MalformedRecord(format!(
            "experiment {accession} has no RUN"
        )));
    }

    let mut mapper = PackageMapper::new(exp_pkg);
    mapper.experiment(experiment)?;
    mapper.submission(package.child(SUBMISSION))?;
    mapper.organization(package.child(ORGANIZATION))?;
    mapper.study(package.child(STUDY))?;

    let samples: Vec<&XmlElement> = package.children_named(SAMPLE).collect();
    mapper.samples(&samples)?;
    if let Some(pool) = package.child(POOL) {
        let members: Vec<&XmlElement> = pool.children_named(MEMBER).collect();
        if !members.is_empty() && members.len() != samples.len() {
            warn!(
                exp_pkg,
                samples = samples.len(),
                members = members.len(),
                "pool members do not match samples"
            );
        }
        mapper.pool(&members, samples.len())?;
    }
    mapper.runs(&runs)?;
    Ok(mapper.fragment)
}

struct PackageMapper {
    exp_pkg: i64,
    fragment: GraphFragment,
    read_vars: BTreeSet<String>,
}

impl PackageMapper {
    fn new(exp_pkg: i64) -> Self {
        Self {
            exp_pkg,
            fragment: GraphFragment::new(),
            read_vars: BTreeSet::new(),
        }
    }

    fn tagged(&self) -> Props {
        let mut props = Props::new();
        props.insert(EXP_PKG.to_string(), PropValue::Int(self.exp_pkg));
        props
    }

    fn experiment(&mut self, experiment: &XmlElement) -> Result<(), SraGraphError> {
        let mut design_props = self.tagged();
        let design = experiment.child(DESIGN);
        if design.is_none() {
            warn!(exp_pkg = self.exp_pkg, "experiment without DESIGN");
        }
        let description = design
            .and_then(|design| design.child("DESIGN_DESCRIPTION"))
            .and_then(XmlElement::text)
            .unwrap_or_default();
        design_props.insert("description".to_string(), description.into());
        self.fragment.node("des", NodeLabel::Design, design_props)?;

        if let Some(design) = design {
            self.library(design)?;
            self.spot_descriptor(design)?;
        }

        let platform = experiment.child("PLATFORM").and_then(XmlElement::first_child);
        if let Some(platform) = platform {
            let mut props = Props::new();
            props.insert("type".to_string(), platform.tag.clone().into());
            if let Some(model) = platform.first_child().and_then(XmlElement::text) {
                props.insert("model".to_string(), model.into());
            }
            self.fragment.node("inst", NodeLabel::Platform, props)?;
        } else {
            warn!(exp_pkg = self.exp_pkg, "experiment without PLATFORM");
        }

        let mut props = experiment.attr_props();
        props.extend(self.tagged());
        let title = experiment.child("TITLE").and_then(XmlElement::text);
        props.insert("title".to_string(), title.unwrap_or_default().into());
        self.fragment.node("exp", NodeLabel::Experiment, props)?;
        self.fragment.relate("exp", Rel::HasDesign, "des")?;
        if self.fragment.has_var("inst") {
            self.fragment.relate("exp", Rel::UsingInstrument, "inst")?;
        }
        Ok(())
    }

    fn library(&mut self, design: &XmlElement) -> Result<(), SraGraphError> {
        let Some(descriptor) = design.child("LIBRARY_DESCRIPTOR") else {
            return Ok(());
        };
        let mut props = self.tagged();
        for item in &descriptor.children {
            if item.tag == LIBRARY_LAYOUT {
                if let Some(layout) = item.first_child() {
                    props.insert(LIBRARY_LAYOUT.to_string(), layout.tag.clone().into());
                }
            } else {
                props.insert(item.tag.clone(), item.text().unwrap_or_default().into());
            }
        }
        self.fragment.node("lib", NodeLabel::Library, props)?;
        self.fragment.relate("des", Rel::UsingLibrary, "lib")
    }

    fn spot_descriptor(&mut self, design: &XmlElement) -> Result<(), SraGraphError> {
        let Some(decode) = design.find("SPOT_DESCRIPTOR/SPOT_DECODE_SPEC") else {
            return Ok(());
        };
        let mut props = self.tagged();
        for item in decode.children.iter().filter(|item| item.tag != READ_SPEC) {
            props.insert(item.tag.clone(), item.text().unwrap_or_default().into());
        }
        self.fragment.node("spd", NodeLabel::SpotDescriptor, props)?;
        self.fragment.relate("des", Rel::HasSpotDescriptor, "spd")?;

        for (position, spec) in decode.children_named(READ_SPEC).enumerate() {
            self.read_spec(spec, position)?;
        }
        Ok(())
    }

    fn read_spec(&mut self, spec: &XmlElement, position: usize) -> Result<(), SraGraphError> {
        let index = spec
            .child(READ_INDEX)
            .and_then(XmlElement::text)
            .map(|text| text.trim().to_string())
            .unwrap_or_else(|| position.to_string());
        let var = format!("rd{index}");
        if self.read_vars.contains(&var) {
            warn!(exp_pkg = self.exp_pkg, index = %index, "duplicate READ_INDEX, read spec skipped");
            return Ok(());
        }

        let mut props = self.tagged();
        let mut basecalls = Vec::new();
        for item in &spec.children {
            if item.tag == EXPECTED_BASECALL_TABLE {
                basecalls.extend(item.children.iter());
            } else if let Some(text) = item.text() {
                props.insert(item.tag.clone(), text.into());
            } else {
                props.extend(item.attr_props());
            }
        }
        self.fragment.node(var.clone(), NodeLabel::Read, props)?;
        self.fragment.relate("des", Rel::HasRead, &var)?;
        self.read_vars.insert(var.clone());

        for (i, basecall) in basecalls.into_iter().enumerate() {
            let mut props = basecall.attr_props();
            props.extend(self.tagged());
            props.insert(
                "basecall".to_string(),
                basecall.text().unwrap_or_default().into(),
            );
            let bc_var = format!("bc{index}_{i}");
            self.fragment.node(bc_var.clone(), NodeLabel::Basecall, props)?;
            self.fragment.relate(&var, Rel::HasBasecall, &bc_var)?;
        }
        Ok(())
    }

    fn submission(&mut self, submission: Option<&XmlElement>) -> Result<(), SraGraphError> {
        let Some(submission) = submission else {
            warn!(exp_pkg = self.exp_pkg, "package without SUBMISSION");
            return Ok(());
        };
        self.fragment
            .node("sub", NodeLabel::Submission, submission.attr_props())?;
        self.fragment.relate("exp", Rel::SubmittedBy, "sub")
    }

    fn organization(&mut self, organization: Option<&XmlElement>) -> Result<(), SraGraphError> {
        let Some(organization) = organization else {
            warn!(exp_pkg = self.exp_pkg, "package without Organization");
            return Ok(());
        };
        let mut props = organization.attr_props();
        let name = organization.child("Name");
        if let Some(name) = name {
            props.extend(name.attr_props());
        }
        if let Some(contact) = organization.child("Contact") {
            props.extend(contact.attr_props());
        }
        if let Some(name) = name.and_then(XmlElement::text) {
            props.insert("Name".to_string(), name.into());
        }
        self.fragment.node("org", NodeLabel::Organization, props)
    }

    fn study(&mut self, study: Option<&XmlElement>) -> Result<(), SraGraphError> {
        let Some(study) = study else {
            warn!(exp_pkg = self.exp_pkg, "package without STUDY");
            return Ok(());
        };
        let mut props = study.attr_props();
        if let Some(descriptor) = study.child("DESCRIPTOR") {
            for info in &descriptor.children {
                match info.text() {
                    Some(text) => {
                        props.insert(info.tag.clone(), text.into());
                    }
                    None => props.extend(info.attr_props()),
                }
            }
        }
        if let Some(links) = study.child("STUDY_LINKS") {
            props.extend(study_links(links));
        }
        self.fragment.node("stu", NodeLabel::Study, props)?;
        if self.fragment.has_var("org") {
            self.fragment.merge_relation("stu", Rel::CarriedOutBy, "org")?;
        }
        self.fragment.relate("exp", Rel::DoneIn, "stu")
    }

    fn samples(&mut self, samples: &[&XmlElement]) -> Result<(), SraGraphError> {
        for (i, sample) in samples.iter().enumerate() {
            let var = format!("sam{i}");
            self.fragment.node(var.clone(), NodeLabel::Sample, sample_props(sample, self.exp_pkg))?;
            if self.fragment.has_var("sub") {
                self.fragment.merge_relation(&var, Rel::SubmittedBy, "sub")?;
            }
            self.fragment.relate(&var, Rel::UsedIn, "exp")?;
            if self.fragment.has_var("stu") {
                self.fragment.merge_relation(&var, Rel::UsedIn, "stu")?;
            }

            let attributes = tag_value_pairs(sample, "SAMPLE_ATTRIBUTES");
            if !attributes.is_empty() {
                let att_var = format!("sam_att{i}");
                self.fragment
                    .node(att_var.clone(), NodeLabel::SampleAttrib, attributes)?;
                self.fragment
                    .merge_relation(&var, Rel::HasSampleAttribute, &att_var)?;
            }
        }
        Ok(())
    }

    fn pool(&mut self, members: &[&XmlElement], samples: usize) -> Result<(), SraGraphError> {
        for (i, member) in members.iter().enumerate() {
            let var = format!("mem{i}");
            let props = self.member_props(member);
            self.fragment.node(var.clone(), NodeLabel::Member, props)?;
            if i < samples {
                self.fragment.relate(&format!("sam{i}"), Rel::HasPoolData, &var)?;
            }
        }
        Ok(())
    }

    fn member_props(&self, member: &XmlElement) -> Props {
        let mut props = self.tagged();
        for key in ["spots", "bases", "accession"] {
            match member.attr(key) {
                Some(value) => {
                    props.insert(key.to_string(), value.into());
                }
                None => warn!(exp_pkg = self.exp_pkg, key, "pool member attribute missing"),
            }
        }
        props
    }

    fn runs(&mut self, runs: &[&XmlElement]) -> Result<(), SraGraphError> {
        for (i, run) in runs.iter().enumerate() {
            let var = format!("run{i}");
            let mut props = run.attr_props();
            props.extend(self.tagged());
            let statistics = run.child("Statistics");
            if let Some(statistics) = statistics {
                props.extend(statistics.attr_props());
            }
            self.fragment.node(var.clone(), NodeLabel::Run, props)?;

            if let Some(statistics) = statistics {
                for read in statistics.children_named("Read") {
                    self.read_statistics(&var, read)?;
                }
            }
            self.fragment.relate("exp", Rel::HasRun, &var)?;

            if let Some(pool) = run.child(POOL) {
                for (j, member) in pool.children_named(MEMBER).enumerate() {
                    let mem_var = format!("mem{i}_{j}");
                    let props = self.member_props(member);
                    self.fragment.node(mem_var.clone(), NodeLabel::Member, props)?;
                    self.fragment.relate(&var, Rel::HasPoolData, &mem_var)?;
                }
            }

            let attributes = tag_value_pairs(run, "RUN_ATTRIBUTES");
            if !attributes.is_empty() {
                let mut props = attributes;
                props.extend(self.tagged());
                let att_var = format!("run_att{i}");
                self.fragment.node(att_var.clone(), NodeLabel::RunAttrib, props)?;
                self.fragment.relate(&var, Rel::HasRunAttribute, &att_var)?;
            }

            for (j, file) in run.find_all("SRAFiles/SRAFile").into_iter().enumerate() {
                let mut props = file_props(file);
                props.extend(self.tagged());
                let file_var = format!("sra_f{i}_{j}");
                self.fragment.node(file_var.clone(), NodeLabel::SraFile, props)?;
                self.fragment.relate(&var, Rel::HasSraFile, &file_var)?;
            }

            for (j, file) in run.find_all("CloudFiles/CloudFile").into_iter().enumerate() {
                let file_var = format!("cloud_f{i}_{j}");
                self.fragment
                    .node(file_var.clone(), NodeLabel::CloudFile, file_props(file))?;
                self.fragment.relate(&var, Rel::HasCloudFile, &file_var)?;
            }

            if let Some(bases) = run.child("Bases") {
                let bas_var = format!("bas{i}");
                let props = self.bases_props(bases);
                self.fragment.node(bas_var.clone(), NodeLabel::Bases, props)?;
                self.fragment.relate(&var, Rel::HasBases, &bas_var)?;
            }
        }
        Ok(())
    }

    /// Links a run to the read it measured, falling back to a shared placeholder read.
    fn read_statistics(&mut self, run_var: &str, read: &XmlElement) -> Result<(), SraGraphError> {
        let index = read.attr("index").map(str::trim);
        let target = match index.map(|index| format!("rd{index}")) {
            Some(var) if self.read_vars.contains(&var) => var,
            _ => {
                if !self.read_vars.is_empty() {
                    warn!(
                        exp_pkg = self.exp_pkg,
                        index = index.unwrap_or("?"),
                        "read statistics without matching READ_SPEC"
                    );
                }
                if !self.fragment.has_var("rd") {
                    let props = self.tagged();
                    self.fragment.node("rd", NodeLabel::Read, props)?;
                }
                "rd".to_string()
            }
        };
        self.fragment
            .relate_with(run_var, Rel::ReadStatistics, &target, read.attr_props(), false)
    }

    fn bases_props(&self, bases: &XmlElement) -> Props {
        let mut props = bases.attr_props();
        props.extend(self.tagged());
        for base in bases.children_named("Base") {
            match (base.attr("value"), base.attr("count")) {
                (Some(value), Some(count)) => {
                    props.insert(value.to_string(), count.into());
                }
                _ => warn!(exp_pkg = self.exp_pkg, "Base element without value/count"),
            }
        }
        if let Some(ratio) = gc_ratio(&props) {
            props.insert("GC_Ratio".to_string(), PropValue::Float(ratio));
        }
        props
    }
}

fn sample_props(sample: &XmlElement, exp_pkg: i64) -> Props {
    let mut props = sample.attr_props();
    match sample.find("IDENTIFIERS/EXTERNAL_ID") {
        Some(external) => {
            props.extend(external.attr_props());
            props.insert(
                EXTERNAL_ID.to_string(),
                external.text().unwrap_or_default().into(),
            );
        }
        None => warn!(exp_pkg, "sample without EXTERNAL_ID"),
    }
    let title = sample.child("TITLE").and_then(XmlElement::text);
    props.insert("TITLE".to_string(), title.unwrap_or_default().into());
    for key in ["TAXON_ID", "SCIENTIFIC_NAME"] {
        if let Some(value) = sample
            .child("SAMPLE_NAME")
            .and_then(|name| name.child(key))
            .and_then(XmlElement::text)
        {
            props.insert(key.to_string(), value.into());
        }
    }
    if let Some(description) = sample.child("DESCRIPTION").and_then(XmlElement::text) {
        props.insert("DESCRIPTION".to_string(), description.into());
    }
    props
}

/// Collects `<X_ATTRIBUTE><TAG/><VALUE/></X_ATTRIBUTE>` lists.
fn tag_value_pairs(element: &XmlElement, container: &str) -> Props {
    let mut props = Props::new();
    let Some(list) = element.child(container) else {
        return props;
    };
    for attribute in &list.children {
        let Some(tag) = attribute.child("TAG").and_then(XmlElement::text) else {
            continue;
        };
        let value = attribute
            .child("VALUE")
            .and_then(XmlElement::text)
            .unwrap_or_default();
        props.insert(tag.to_string(), value.into());
    }
    props
}

/// File attributes plus each alternative location keyed as `{org}_{attribute}`.
fn file_props(file: &XmlElement) -> Props {
    let mut props = file.attr_props();
    for alternative in &file.children {
        let org = alternative.attr("org").unwrap_or("alt");
        for (key, value) in alternative.attrs.iter().filter(|(key, _)| key != "org") {
            props.insert(format!("{org}_{key}"), value.as_str().into());
        }
    }
    props
}

/// Flattens study links; repeated link kinds get a numeric suffix starting at 2.
fn study_links(links: &XmlElement) -> Props {
    let mut props = Props::new();
    let mut seen = BTreeSet::new();
    for study_link in &links.children {
        let Some(link) = study_link.first_child() else {
            continue;
        };
        let mut tag = link.tag.clone();
        let mut suffix = 2;
        while seen.contains(&tag) {
            tag = format!("{}{suffix}", link.tag);
            suffix += 1;
        }
        seen.insert(tag.clone());
        for info in &link.children {
            if let Some(text) = info.text() {
                props.insert(format!("{tag}_{}", info.tag), text.into());
            }
        }
    }
    props
}
