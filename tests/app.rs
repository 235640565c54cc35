use std::time::Duration;

use assert_matches::assert_matches;

use sra_metagraph::app::{App, LoadOptions};
use sra_metagraph::config::{Config, ConfigLoader, ResolvedConfig};
use sra_metagraph::domain::{NodeLabel, SearchQuery};
use sra_metagraph::entrez::{EntrezClient, EntrezDb, EntrezSearch, split_packages};
use sra_metagraph::error::SraGraphError;
use sra_metagraph::graph::MemoryGraph;
use sra_metagraph::pipeline::CancelToken;
use sra_metagraph::progress::SilentProgress;
use sra_metagraph::xml::{XmlElement, parse_document};

const PACKAGE_SET: &str = include_str!("fixtures/experiment_package.xml");
const MALFORMED: &str = "<EXPERIMENT_PACKAGE><SUBMISSION accession=\"SRA9\"/></EXPERIMENT_PACKAGE>";

/// Serves the fixture package for id `good` and a package without experiment for `bad`.
struct MockEntrez {
    ids: Vec<&'static str>,
}

impl MockEntrez {
    fn with_ids(ids: &[&'static str]) -> Self {
        Self { ids: ids.to_vec() }
    }
}

impl EntrezClient for MockEntrez {
    fn search_count(&self, search: &EntrezSearch) -> Result<u64, SraGraphError> {
        match search.db {
            EntrezDb::Sra => Ok(self.ids.len() as u64),
            EntrezDb::Assembly => Ok(0),
        }
    }

    fn search_ids(
        &self,
        _search: &EntrezSearch,
        retstart: u64,
        retmax: usize,
    ) -> Result<Vec<String>, SraGraphError> {
        Ok(self
            .ids
            .iter()
            .skip(retstart as usize)
            .take(retmax)
            .map(|id| id.to_string())
            .collect())
    }

    fn fetch_sra_packages(&self, ids: &[String]) -> Result<Vec<XmlElement>, SraGraphError> {
        let mut packages = Vec::new();
        for id in ids {
            match id.as_str() {
                "good" => packages.extend(split_packages(parse_document(PACKAGE_SET)?)),
                "bad" => packages.push(parse_document(MALFORMED)?),
                other => return Err(SraGraphError::EntrezResponse(format!("unknown id {other}"))),
            }
        }
        Ok(packages)
    }

    fn fetch_assembly_summaries(&self, _ids: &[String]) -> Result<Vec<XmlElement>, SraGraphError> {
        Ok(Vec::new())
    }
}

fn config() -> ResolvedConfig {
    let mut config = ConfigLoader::resolve_config(Config::default()).unwrap();
    config.pipeline.min_fetch_interval = Duration::ZERO;
    config.assembly.min_fetch_interval = Duration::ZERO;
    config.pipeline.requests_per_second = 1000;
    config.assembly.requests_per_second = 1000;
    config
}

fn query() -> SearchQuery {
    "\"soil metagenome\"[Organism]".parse().unwrap()
}

#[test]
fn load_without_postprocess_leaves_graph_unrepaired() {
    let app = App::new(MockEntrez::with_ids(&["good"]), MemoryGraph::new(), config());
    let options = LoadOptions {
        skip_postprocess: true,
    };

    let result = app
        .load(&query(), &options, &CancelToken::new(), &SilentProgress)
        .unwrap();

    assert_eq!(result.query, "\"soil metagenome\"[Organism]");
    assert_eq!(result.pipeline.consumed, 1);
    assert!(result.postprocess.is_none());
    assert!(app.stats().unwrap().nodes > 0);
    assert!(!app.check().unwrap().passed);
}

#[test]
fn load_with_postprocess_passes_the_check() {
    let app = App::new(MockEntrez::with_ids(&["good"]), MemoryGraph::new(), config());

    let result = app
        .load(&query(), &LoadOptions::default(), &CancelToken::new(), &SilentProgress)
        .unwrap();

    let postprocess = result.postprocess.unwrap();
    assert!(postprocess.repair.success());
    assert!(postprocess.integrity.passed());
    assert_eq!(postprocess.assemblies.map(|report| report.total), Some(0));
    assert!(app.check().unwrap().passed);
}

#[test]
fn malformed_packages_are_skipped_without_using_a_number() {
    let app = App::new(
        MockEntrez::with_ids(&["bad", "good", "bad"]),
        MemoryGraph::new(),
        config(),
    );
    let options = LoadOptions {
        skip_postprocess: true,
    };

    let result = app
        .load(&query(), &options, &CancelToken::new(), &SilentProgress)
        .unwrap();

    assert_eq!(result.pipeline.consumed, 1);
    assert_eq!(result.pipeline.skipped, 2);
    assert_eq!(result.pipeline.next_seq, result.pipeline.first_seq + 1);
    let experiments = app.store().nodes_with_label(NodeLabel::Experiment);
    assert_eq!(experiments.len(), 1);
    assert_eq!(
        experiments[0].props.get("exp_pkg").and_then(|value| value.as_i64()),
        Some(result.pipeline.first_seq)
    );
}

#[test]
fn entrez_failure_fails_the_load() {
    let app = App::new(
        MockEntrez::with_ids(&["good", "mystery"]),
        MemoryGraph::new(),
        config(),
    );
    let result = app.load(&query(), &LoadOptions::default(), &CancelToken::new(), &SilentProgress);
    assert_matches!(result, Err(SraGraphError::EntrezResponse(message)) if message.contains("mystery"));
}

#[test]
fn cancelled_postprocess_is_aborted() {
    let app = App::new(MockEntrez::with_ids(&[]), MemoryGraph::new(), config());
    let cancel = CancelToken::new();
    cancel.cancel();

    assert_matches!(
        app.postprocess(&cancel, &SilentProgress),
        Err(SraGraphError::Aborted)
    );
}

#[test]
fn clear_empties_the_graph() {
    let app = App::new(MockEntrez::with_ids(&["good"]), MemoryGraph::new(), config());
    let options = LoadOptions {
        skip_postprocess: true,
    };
    app.load(&query(), &options, &CancelToken::new(), &SilentProgress)
        .unwrap();

    assert!(app.clear().unwrap().cleared);
    let stats = app.stats().unwrap();
    assert_eq!(stats.nodes, 0);
    assert_eq!(stats.relationships, 0);
}

#[test]
fn results_serialize_for_json_output() {
    let app = App::new(MockEntrez::with_ids(&["good"]), MemoryGraph::new(), config());
    let result = app
        .load(&query(), &LoadOptions::default(), &CancelToken::new(), &SilentProgress)
        .unwrap();

    let value = serde_json::to_value(&result).unwrap();
    assert_eq!(value["pipeline"]["consumed"], 1);
    assert_eq!(value["postprocess"]["integrity"]["gc_ratios"], true);
    assert_eq!(value["postprocess"]["repair"]["steps"][1]["step"], "assemblies");
}
