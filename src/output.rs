use std::io::{self, Write};

use serde::Serialize;

use crate::app::{CheckResult, ClearResult, LoadResult, PostprocessResult, StatsResult};
use crate::postprocess::RepairReport;

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_load(result: &LoadResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_postprocess(result: &PostprocessResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_check(result: &CheckResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_stats(result: &StatsResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_clear(result: &ClearResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Plain-text summaries for terminal use.
pub struct TextOutput;

impl TextOutput {
    pub fn print_load(result: &LoadResult) {
        let report = &result.pipeline;
        println!("query: {}", result.query);
        println!(
            "packages: {} loaded, {} skipped, {} found",
            report.consumed, report.skipped, report.total
        );
        if report.consumed > 0 {
            println!("exp_pkg: {}..{}", report.first_seq, report.next_seq - 1);
        }
        if let Some(postprocess) = &result.postprocess {
            Self::print_postprocess(postprocess);
        }
    }

    pub fn print_postprocess(result: &PostprocessResult) {
        Self::print_repair(&result.repair);
        if let Some(assemblies) = &result.assemblies {
            println!("assemblies: {} attached", assemblies.consumed);
        }
        println!(
            "integrity: {}",
            if result.integrity.passed() { "ok" } else { "FAILED" }
        );
    }

    fn print_repair(report: &RepairReport) {
        for step in &report.steps {
            match &step.error {
                None => println!("  {:?}: {} changed", step.step, step.changed),
                Some(error) => println!("  {:?}: failed ({error})", step.step),
            }
        }
    }

    pub fn print_check(result: &CheckResult) {
        let report = &result.report;
        for (name, ok) in [
            ("design/read links", report.design_read_links),
            ("run/read links", report.run_read_links),
            ("integer properties", report.integers),
            ("GC ratios", report.gc_ratios),
            ("sentinel values removed", report.sentinels_removed),
            ("aliases unified", report.aliases_unified),
            ("geo_loc_name format", report.geo_loc_names),
        ] {
            println!("{} {name}", if ok { "ok  " } else { "FAIL" });
        }
        println!("{}", if result.passed { "graph ok" } else { "graph corrupted" });
    }

    pub fn print_stats(result: &StatsResult) {
        println!("nodes: {}", result.nodes);
        println!("relationships: {}", result.relationships);
    }
}
