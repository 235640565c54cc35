use tracing::{info, warn};

use crate::domain::SearchQuery;
use crate::entrez::{EntrezClient, EntrezSearch};
use crate::error::SraGraphError;
use crate::graph::GraphStore;
use crate::mapper::map_experiment_package;
use crate::pipeline::{CancelToken, Consumed, PipelineReport, PipelineSettings, Stages, run_pipeline};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::xml::XmlElement;

/// SRA search, package fetch and graph write as pipeline stages.
pub struct SraStages<'a, E, G> {
    entrez: &'a E,
    store: &'a G,
    search: EntrezSearch,
}

impl<'a, E: EntrezClient, G: GraphStore> SraStages<'a, E, G> {
    pub fn new(entrez: &'a E, store: &'a G, query: &SearchQuery) -> Self {
        Self {
            entrez,
            store,
            search: EntrezSearch::sra(query.as_str()),
        }
    }
}

impl<E: EntrezClient, G: GraphStore> Stages for SraStages<'_, E, G> {
    type Record = XmlElement;

    fn count(&self) -> Result<u64, SraGraphError> {
        self.entrez.search_count(&self.search)
    }

    fn list_ids(&self, retstart: u64, retmax: usize) -> Result<Vec<String>, SraGraphError> {
        self.entrez.search_ids(&self.search, retstart, retmax)
    }

    fn fetch(&self, ids: &[String]) -> Result<Vec<XmlElement>, SraGraphError> {
        self.entrez.fetch_sra_packages(ids)
    }

    fn consume(&self, record: XmlElement, seq: i64) -> Result<Consumed, SraGraphError> {
        let fragment = match map_experiment_package(&record, seq) {
            Ok(fragment) => fragment,
            Err(SraGraphError::MalformedRecord(reason)) => {
                warn!(exp_pkg = seq, "skipping package: {reason}");
                return Ok(Consumed::Skipped);
            }
            Err(err) => return Err(err),
        };
        self.store.write_fragment(&fragment)?;
        Ok(Consumed::Written)
    }
}

/// Loads every package matching `query` and reports completion on `sink`.
pub fn start_search<E: EntrezClient, G: GraphStore>(
    entrez: &E,
    store: &G,
    query: &SearchQuery,
    settings: &PipelineSettings,
    cancel: &CancelToken,
    sink: &dyn ProgressSink,
) -> Result<PipelineReport, SraGraphError> {
    info!(query = query.as_str(), "starting search");
    sink.event(ProgressEvent::Status {
        message: format!("Searching SRA for {query}"),
    });
    let stages = SraStages::new(entrez, store, query);
    let result = run_pipeline(&stages, settings, cancel, sink);
    if let Ok(report) = &result {
        info!(
            consumed = report.consumed,
            skipped = report.skipped,
            next_pkg = report.next_seq,
            "search loaded"
        );
    }
    sink.event(ProgressEvent::Finished {
        success: result.is_ok(),
    });
    result
}
