use assert_matches::assert_matches;

use sra_metagraph::domain::{EXP_PKG, NodeLabel, PropValue, Rel};
use sra_metagraph::entrez::split_packages;
use sra_metagraph::error::SraGraphError;
use sra_metagraph::graph::{GraphStore, MemoryGraph};
use sra_metagraph::mapper::map_experiment_package;
use sra_metagraph::xml::{XmlElement, parse_document};

const PACKAGE_SET: &str = include_str!("fixtures/experiment_package.xml");

fn package() -> XmlElement {
    let root = parse_document(PACKAGE_SET).unwrap();
    let mut packages = split_packages(root);
    assert_eq!(packages.len(), 1);
    packages.remove(0)
}

fn load(graph: &MemoryGraph, exp_pkg: i64) {
    let fragment = map_experiment_package(&package(), exp_pkg).unwrap();
    graph.write_fragment(&fragment).unwrap();
}

#[test]
fn experiment_is_linked_to_its_run() {
    let graph = MemoryGraph::new();
    load(&graph, 7);

    let experiments = graph.nodes_with_label(NodeLabel::Experiment);
    let runs = graph.nodes_with_label(NodeLabel::Run);
    assert_eq!(experiments.len(), 1);
    assert_eq!(runs.len(), 1);
    let has_run = graph.outgoing(experiments[0].id, Rel::HasRun);
    assert_eq!(has_run.len(), 1);
    assert_eq!(has_run[0].to, runs[0].id);
    assert_eq!(experiments[0].str_prop("accession"), Some("SRX100001"));
    assert_eq!(runs[0].str_prop("nspots"), Some("1000"));
}

#[test]
fn per_record_nodes_carry_the_package_number() {
    let graph = MemoryGraph::new();
    load(&graph, 7);

    for label in [
        NodeLabel::Experiment,
        NodeLabel::Design,
        NodeLabel::Library,
        NodeLabel::SpotDescriptor,
        NodeLabel::Read,
        NodeLabel::Basecall,
        NodeLabel::Member,
        NodeLabel::Run,
        NodeLabel::RunAttrib,
        NodeLabel::SraFile,
        NodeLabel::Bases,
    ] {
        let nodes = graph.nodes_with_label(label);
        assert!(!nodes.is_empty(), "no {label} node");
        for node in nodes {
            assert_eq!(node.props.get(EXP_PKG), Some(&PropValue::Int(7)), "{label}");
        }
    }
    for label in [NodeLabel::Study, NodeLabel::Sample, NodeLabel::Organization] {
        let nodes = graph.nodes_with_label(label);
        assert_eq!(nodes.len(), 1);
        assert!(!nodes[0].props.contains_key(EXP_PKG), "{label}");
    }
}

#[test]
fn reads_are_linked_from_design_and_run() {
    let graph = MemoryGraph::new();
    load(&graph, 0);

    let design = graph.nodes_with_label(NodeLabel::Design).remove(0);
    let run = graph.nodes_with_label(NodeLabel::Run).remove(0);
    let reads = graph.nodes_with_label(NodeLabel::Read);
    assert_eq!(reads.len(), 2);
    assert_eq!(graph.outgoing(design.id, Rel::HasRead).len(), 2);

    let statistics = graph.outgoing(run.id, Rel::ReadStatistics);
    assert_eq!(statistics.len(), 2);
    assert!(statistics.iter().all(|edge| edge.props.get("count") == Some(&PropValue::from("1000"))));
    assert!(graph.unlinked_pairs(NodeLabel::Run, NodeLabel::Read).unwrap().is_empty());

    let reverse = reads
        .iter()
        .find(|read| read.str_prop("READ_TYPE") == Some("Reverse"))
        .unwrap();
    let basecalls = graph.outgoing(reverse.id, Rel::HasBasecall);
    assert_eq!(basecalls.len(), 1);
}

#[test]
fn library_design_and_platform_are_flattened() {
    let graph = MemoryGraph::new();
    load(&graph, 0);

    let library = graph.nodes_with_label(NodeLabel::Library).remove(0);
    assert_eq!(library.str_prop("LIBRARY_LAYOUT"), Some("PAIRED"));
    assert_eq!(library.str_prop("LIBRARY_STRATEGY"), Some("AMPLICON"));

    let platform = graph.nodes_with_label(NodeLabel::Platform).remove(0);
    assert_eq!(platform.str_prop("type"), Some("ILLUMINA"));
    assert_eq!(platform.str_prop("model"), Some("Illumina MiSeq"));

    let study = graph.nodes_with_label(NodeLabel::Study).remove(0);
    assert_eq!(study.str_prop("STUDY_TITLE"), Some("Grassland soil microbiome"));
    assert_eq!(study.str_prop("existing_study_type"), Some("Metagenomics"));
    assert_eq!(study.str_prop("XREF_LINK_ID"), Some("31000001"));
}

#[test]
fn bases_get_gc_ratio_and_files_keep_alternatives() {
    let graph = MemoryGraph::new();
    load(&graph, 0);

    let bases = graph.nodes_with_label(NodeLabel::Bases).remove(0);
    assert_eq!(bases.props.get("GC_Ratio"), Some(&PropValue::Float(0.55)));
    assert_eq!(bases.str_prop("G"), Some("150000"));

    let file = graph.nodes_with_label(NodeLabel::SraFile).remove(0);
    assert_eq!(file.str_prop("semantic_name"), Some("SRA Lite"));
    assert_eq!(file.str_prop("AWS_free_egress"), Some("worldwide"));

    let sample = graph.nodes_with_label(NodeLabel::Sample).remove(0);
    assert_eq!(sample.str_prop("EXTERNAL_ID"), Some("SAMN00000001"));
    assert_eq!(sample.str_prop("namespace"), Some("BioSample"));
    assert_eq!(sample.str_prop("TAXON_ID"), Some("410658"));
}

#[test]
fn shared_entities_are_reused_across_packages() {
    let graph = MemoryGraph::new();
    load(&graph, 0);
    load(&graph, 1);

    assert_eq!(graph.nodes_with_label(NodeLabel::Experiment).len(), 2);
    assert_eq!(graph.nodes_with_label(NodeLabel::Run).len(), 2);
    for label in [
        NodeLabel::Organization,
        NodeLabel::Study,
        NodeLabel::Sample,
        NodeLabel::SampleAttrib,
        NodeLabel::Submission,
        NodeLabel::Platform,
        NodeLabel::CloudFile,
    ] {
        assert_eq!(graph.nodes_with_label(label).len(), 1, "{label}");
    }

    let study = graph.nodes_with_label(NodeLabel::Study).remove(0);
    let sample = graph.nodes_with_label(NodeLabel::Sample).remove(0);
    assert_eq!(graph.incoming(study.id, Rel::DoneIn).len(), 2);
    assert_eq!(graph.outgoing(study.id, Rel::CarriedOutBy).len(), 1);
    assert_eq!(graph.outgoing(sample.id, Rel::HasSampleAttribute).len(), 1);
    let used_in = graph.outgoing(sample.id, Rel::UsedIn);
    assert_eq!(used_in.iter().filter(|edge| edge.to == study.id).count(), 1);
    assert_eq!(used_in.len(), 3);
}

#[test]
fn run_statistics_without_read_spec_use_a_placeholder_read() {
    let package = parse_document(
        r#"<EXPERIMENT_PACKAGE>
             <EXPERIMENT accession="SRX2"><DESIGN><DESIGN_DESCRIPTION>wgs</DESIGN_DESCRIPTION></DESIGN></EXPERIMENT>
             <RUN_SET>
               <RUN accession="SRR2">
                 <Statistics nreads="1" nspots="10"><Read index="0" count="10" average="150" stdev="0"/></Statistics>
               </RUN>
             </RUN_SET>
           </EXPERIMENT_PACKAGE>"#,
    )
    .unwrap();
    let graph = MemoryGraph::new();
    graph
        .write_fragment(&map_experiment_package(&package, 3).unwrap())
        .unwrap();

    let reads = graph.nodes_with_label(NodeLabel::Read);
    assert_eq!(reads.len(), 1);
    assert_eq!(reads[0].props.get(EXP_PKG), Some(&PropValue::Int(3)));
    let run = graph.nodes_with_label(NodeLabel::Run).remove(0);
    assert_eq!(graph.outgoing(run.id, Rel::ReadStatistics).len(), 1);
    assert_eq!(
        graph.unlinked_pairs(NodeLabel::Design, NodeLabel::Read).unwrap().len(),
        1
    );
}

#[test]
fn package_without_experiment_is_malformed() {
    let package = parse_document(
        "<EXPERIMENT_PACKAGE><RUN_SET><RUN accession=\"SRR3\"/></RUN_SET></EXPERIMENT_PACKAGE>",
    )
    .unwrap();
    assert_matches!(
        map_experiment_package(&package, 0),
        Err(SraGraphError::MalformedRecord(_))
    );
}

#[test]
fn fragment_renders_as_one_statement() {
    let cypher = map_experiment_package(&package(), 5).unwrap().to_cypher();
    assert!(cypher.starts_with("CREATE (des:`design`"));
    assert!(cypher.contains("MERGE (org:`organization`"));
    assert!(cypher.contains("MERGE (stu)-[:`carriedOutBy`]->(org)"));
    assert!(cypher.contains("CREATE (exp)-[:`hasRun`]->(run0)"));
    assert!(cypher.contains("`GC_Ratio`: 0.55"));
}

#[test]
fn two_studies_share_one_organization() {
    let graph = MemoryGraph::new();
    load(&graph, 0);
    let second = PACKAGE_SET
        .replace("SRP010001", "SRP010002")
        .replace("PRJNA500001", "PRJNA500002")
        .replace("Grassland soil microbiome", "Forest soil microbiome");
    let package = split_packages(parse_document(&second).unwrap()).remove(0);
    graph
        .write_fragment(&map_experiment_package(&package, 1).unwrap())
        .unwrap();

    assert_eq!(graph.nodes_with_label(NodeLabel::Study).len(), 2);
    let organizations = graph.nodes_with_label(NodeLabel::Organization);
    assert_eq!(organizations.len(), 1);
    let carried_out = graph.incoming(organizations[0].id, Rel::CarriedOutBy);
    assert_eq!(carried_out.len(), 2);
    assert_ne!(carried_out[0].from, carried_out[1].from);
}
