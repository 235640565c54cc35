use serde::Serialize;

use crate::assembly::enrich_assemblies;
use crate::config::ResolvedConfig;
use crate::domain::SearchQuery;
use crate::entrez::EntrezClient;
use crate::error::SraGraphError;
use crate::graph::GraphStore;
use crate::loader::start_search;
use crate::pipeline::{CancelToken, PipelineReport};
use crate::postprocess::{IntegrityReport, Postprocessor, RepairReport};
use crate::progress::{ProgressEvent, ProgressSink};

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub skip_postprocess: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadResult {
    pub query: String,
    pub pipeline: PipelineReport,
    pub postprocess: Option<PostprocessResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostprocessResult {
    pub repair: RepairReport,
    pub assemblies: Option<PipelineReport>,
    pub integrity: IntegrityReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub passed: bool,
    pub report: IntegrityReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResult {
    pub nodes: u64,
    pub relationships: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClearResult {
    pub cleared: bool,
}

pub struct App<E: EntrezClient, G: GraphStore> {
    entrez: E,
    store: G,
    config: ResolvedConfig,
}

impl<E: EntrezClient, G: GraphStore> App<E, G> {
    pub fn new(entrez: E, store: G, config: ResolvedConfig) -> Self {
        Self {
            entrez,
            store,
            config,
        }
    }

    pub fn store(&self) -> &G {
        &self.store
    }

    /// Loads all packages matching `query`, then repairs the graph unless told not to.
    pub fn load(
        &self,
        query: &SearchQuery,
        options: &LoadOptions,
        cancel: &CancelToken,
        sink: &dyn ProgressSink,
    ) -> Result<LoadResult, SraGraphError> {
        let pipeline = start_search(
            &self.entrez,
            &self.store,
            query,
            &self.config.pipeline,
            cancel,
            sink,
        )?;
        let postprocess = if options.skip_postprocess {
            None
        } else {
            Some(self.postprocess(cancel, sink)?)
        };
        Ok(LoadResult {
            query: query.to_string(),
            pipeline,
            postprocess,
        })
    }

    pub fn postprocess(
        &self,
        cancel: &CancelToken,
        sink: &dyn ProgressSink,
    ) -> Result<PostprocessResult, SraGraphError> {
        let processor = Postprocessor::new(&self.store, &self.config.postprocess);
        let mut assemblies = None;
        let repair = processor.repair(
            || {
                let report = enrich_assemblies(
                    &self.entrez,
                    &self.store,
                    &self.config.assembly,
                    cancel,
                    sink,
                )?;
                let consumed = report.consumed;
                assemblies = Some(report);
                Ok(consumed)
            },
            cancel,
            sink,
        );
        if cancel.is_cancelled() {
            sink.event(ProgressEvent::Finished { success: false });
            return Err(SraGraphError::Aborted);
        }
        let integrity = processor.check()?;
        sink.event(ProgressEvent::Finished {
            success: repair.success(),
        });
        Ok(PostprocessResult {
            repair,
            assemblies,
            integrity,
        })
    }

    pub fn check(&self) -> Result<CheckResult, SraGraphError> {
        let report = Postprocessor::new(&self.store, &self.config.postprocess).check()?;
        Ok(CheckResult {
            passed: report.passed(),
            report,
        })
    }

    pub fn stats(&self) -> Result<StatsResult, SraGraphError> {
        Ok(StatsResult {
            nodes: self.store.count_nodes()?,
            relationships: self.store.count_relationships()?,
        })
    }

    pub fn clear(&self) -> Result<ClearResult, SraGraphError> {
        self.store.clear()?;
        tracing::info!("graph cleared");
        Ok(ClearResult { cleared: true })
    }
}
