use std::fs;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::domain::NodeLabel;
use crate::error::SraGraphError;
use crate::pipeline::PipelineSettings;

pub const DEFAULT_CONFIG_FILE: &str = "sra-metagraph.json";
pub const DEFAULT_EUTILS_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

/// Parser count above which NCBI tends to throttle or return broken payloads.
pub const PARSER_SOFT_CAP: usize = 3;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub neo4j: Neo4jSection,
    #[serde(default)]
    pub entrez: EntrezSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub assembly: AssemblySection,
    #[serde(default)]
    pub postprocess: PostprocessSection,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Neo4jSection {
    pub uri: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct EntrezSection {
    pub email: Option<String>,
    pub api_key: Option<String>,
    pub tool: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct PipelineSection {
    pub retmax: Option<i64>,
    pub batch: Option<i64>,
    pub parsers: Option<i64>,
    pub producers: Option<i64>,
    pub start_pkg: Option<i64>,
    pub min_fetch_interval_ms: Option<i64>,
    /// NCBI allows 3 per second without an API key and 10 with one.
    pub requests_per_second: Option<i64>,
    pub queue_capacity: Option<i64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct AssemblySection {
    pub retmax: Option<i64>,
    pub batch: Option<i64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct PostprocessSection {
    pub batch_size: Option<i64>,
    pub delete_values: Option<Vec<String>>,
    pub aliases: Option<Vec<AliasRule>>,
    pub dates: Option<Vec<DateRule>>,
    pub integer_properties: Option<Vec<IntegerRule>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AliasRule {
    pub label: NodeLabel,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DateRule {
    pub label: NodeLabel,
    pub properties: Vec<String>,
}

/// Properties coerced to integers. Without a label the rule covers every node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct IntegerRule {
    #[serde(default)]
    pub label: Option<NodeLabel>,
    pub properties: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Neo4jSettings {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub database: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntrezSettings {
    pub email: Option<String>,
    pub api_key: Option<String>,
    pub tool: String,
    pub base_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostprocessSettings {
    pub batch_size: usize,
    pub delete_values: Vec<String>,
    pub aliases: Vec<AliasRule>,
    pub dates: Vec<DateRule>,
    pub integers: Vec<IntegerRule>,
}

impl Default for PostprocessSettings {
    fn default() -> Self {
        Self {
            batch_size: 20_000,
            delete_values: default_delete_values(),
            aliases: default_aliases(),
            dates: default_dates(),
            integers: default_integers(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub neo4j: Neo4jSettings,
    pub entrez: EntrezSettings,
    pub pipeline: PipelineSettings,
    pub assembly: PipelineSettings,
    pub postprocess: PostprocessSettings,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or the first default location holding `sra-metagraph.json`.
    /// Falls back to built-in defaults when there is none.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, SraGraphError> {
        let config = match path {
            Some(path) => {
                let path = Utf8PathBuf::from(path);
                if !path.exists() {
                    return Err(SraGraphError::MissingConfig(path));
                }
                Self::read(&path)?
            }
            None => match default_config_paths().into_iter().find(|path| path.exists()) {
                Some(path) => Self::read(&path)?,
                None => {
                    tracing::debug!("no {DEFAULT_CONFIG_FILE}, using built-in defaults");
                    Config::default()
                }
            },
        };

        let mut resolved = Self::resolve_config(config)?;
        apply_env(&mut resolved, |key| std::env::var(key).ok());
        Ok(resolved)
    }

    pub fn read(path: &Utf8Path) -> Result<Config, SraGraphError> {
        tracing::debug!(%path, "reading config");
        let content =
            fs::read_to_string(path).map_err(|_| SraGraphError::ConfigRead(path.to_path_buf()))?;
        serde_json::from_str(&content).map_err(|err| SraGraphError::ConfigParse(err.to_string()))
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, SraGraphError> {
        let uri = config
            .neo4j
            .uri
            .unwrap_or_else(|| "http://localhost:7474".to_string());
        if !(uri.starts_with("http://") || uri.starts_with("https://")) {
            return Err(SraGraphError::InvalidConfig(format!(
                "neo4j.uri must be an http(s) URL, got {uri}"
            )));
        }
        let neo4j = Neo4jSettings {
            uri,
            user: config.neo4j.user.unwrap_or_else(|| "neo4j".to_string()),
            password: config.neo4j.password.unwrap_or_default(),
            database: config.neo4j.database.unwrap_or_else(|| "raw".to_string()),
        };

        let entrez = EntrezSettings {
            email: non_blank(config.entrez.email),
            api_key: non_blank(config.entrez.api_key),
            tool: non_blank(config.entrez.tool).unwrap_or_else(|| "sra-metagraph".to_string()),
            base_url: non_blank(config.entrez.base_url)
                .unwrap_or_else(|| DEFAULT_EUTILS_URL.to_string()),
        };

        let section = config.pipeline;
        let pipeline = PipelineSettings {
            retmax: positive_or(section.retmax, 150),
            batch: positive_or(section.batch, 100),
            parsers: positive_or(section.parsers, 2),
            producers: positive_or(section.producers, 2),
            start_seq: section.start_pkg.filter(|start| *start >= 0).unwrap_or(0),
            min_fetch_interval: Duration::from_millis(
                positive_or(section.min_fetch_interval_ms, 1000) as u64,
            ),
            requests_per_second: positive_or(section.requests_per_second, 3),
            queue_capacity: positive_or(section.queue_capacity, 1024),
        };
        if pipeline.parsers > PARSER_SOFT_CAP {
            tracing::warn!(
                parsers = pipeline.parsers,
                "more than {PARSER_SOFT_CAP} parsers may get throttled by NCBI"
            );
        }

        let assembly = PipelineSettings {
            retmax: positive_or(config.assembly.retmax, 200),
            batch: positive_or(config.assembly.batch, 100),
            start_seq: 0,
            ..pipeline.clone()
        };

        let section = config.postprocess;
        let postprocess = PostprocessSettings {
            batch_size: positive_or(section.batch_size, 20_000),
            delete_values: section.delete_values.unwrap_or_else(default_delete_values),
            aliases: section.aliases.unwrap_or_else(default_aliases),
            dates: section.dates.unwrap_or_else(default_dates),
            integers: section.integer_properties.unwrap_or_else(default_integers),
        };

        Ok(ResolvedConfig {
            neo4j,
            entrez,
            pipeline,
            assembly,
            postprocess,
        })
    }
}

/// `NEO4J_PASSWORD`, `NCBI_API_KEY` and `NCBI_EMAIL` win over the file.
pub fn apply_env(config: &mut ResolvedConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(password) = lookup("NEO4J_PASSWORD") {
        config.neo4j.password = password;
    }
    if let Some(api_key) = non_blank(lookup("NCBI_API_KEY")) {
        config.entrez.api_key = Some(api_key);
    }
    if let Some(email) = non_blank(lookup("NCBI_EMAIL")) {
        config.entrez.email = Some(email);
    }
}

/// The working directory first, then the user's config directory.
pub fn default_config_paths() -> Vec<Utf8PathBuf> {
    let mut paths = vec![Utf8PathBuf::from(DEFAULT_CONFIG_FILE)];
    if let Some(user) = BaseDirs::new().and_then(|dirs| {
        Utf8PathBuf::from_path_buf(dirs.config_dir().join("sra-metagraph").join(DEFAULT_CONFIG_FILE))
            .ok()
    }) {
        paths.push(user);
    }
    paths
}

fn positive_or(value: Option<i64>, default: usize) -> usize {
    match value {
        Some(value) if value > 0 => value as usize,
        _ => default,
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn default_delete_values() -> Vec<String> {
    [
        "missing",
        "not applicable",
        "n/a",
        "not available",
        "na",
        "not collected",
        "unknown",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

pub fn default_aliases() -> Vec<AliasRule> {
    [
        ("isolation-source", "isolation_source"),
        ("isolation source", "isolation_source"),
        ("STRAIN", "strain"),
        ("Strain", "strain"),
        ("collection date", "collection_date"),
        ("culture-collection", "culture_collection"),
        ("environment_biome", "env_biome"),
        ("biome", "env_biome"),
        ("material", "env_material"),
        ("Sample Name", "sample_name"),
        ("Isolate", "isolate"),
    ]
    .into_iter()
    .map(|(from, to)| AliasRule {
        label: NodeLabel::SampleAttrib,
        from: from.to_string(),
        to: to.to_string(),
    })
    .collect()
}

pub fn default_dates() -> Vec<DateRule> {
    let rule = |label, properties: &[&str]| DateRule {
        label,
        properties: properties.iter().map(|name| name.to_string()).collect(),
    };
    vec![
        rule(NodeLabel::SampleAttrib, &["collection_date"]),
        rule(
            NodeLabel::Assembly,
            &[
                "SubmissionDate",
                "SeqReleaseDate",
                "AsmUpdateDate",
                "AsmReleaseDate_RefSeq",
                "AsmReleaseDate_GenBank",
                "LastUpdateDate",
            ],
        ),
        rule(NodeLabel::Run, &["published"]),
        rule(NodeLabel::SraFile, &["date"]),
    ]
}

pub fn default_integers() -> Vec<IntegerRule> {
    vec![
        IntegerRule {
            label: Some(NodeLabel::Bases),
            properties: ["total_bases", "A", "C", "T", "G", "N", "count"]
                .into_iter()
                .map(str::to_string)
                .collect(),
        },
        IntegerRule {
            label: None,
            properties: vec![crate::domain::EXP_PKG.to_string()],
        },
        IntegerRule {
            label: Some(NodeLabel::AssemblyStats),
            properties: vec!["value".to_string()],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_gets_defaults() {
        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(resolved.neo4j.uri, "http://localhost:7474");
        assert_eq!(resolved.neo4j.database, "raw");
        assert_eq!(resolved.pipeline.retmax, 150);
        assert_eq!(resolved.pipeline.parsers, 2);
        assert_eq!(resolved.pipeline.min_fetch_interval, Duration::from_secs(1));
        assert_eq!(resolved.pipeline.requests_per_second, 3);
        assert_eq!(resolved.assembly.requests_per_second, 3);
        assert_eq!(resolved.assembly.retmax, 200);
        assert_eq!(resolved.postprocess.batch_size, 20_000);
        assert_eq!(resolved.postprocess.aliases.len(), 11);
    }

    #[test]
    fn non_positive_values_fall_back() {
        let config = Config {
            pipeline: PipelineSection {
                batch: Some(0),
                producers: Some(-4),
                start_pkg: Some(-1),
                ..PipelineSection::default()
            },
            ..Config::default()
        };
        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.pipeline.batch, 100);
        assert_eq!(resolved.pipeline.producers, 2);
        assert_eq!(resolved.pipeline.start_seq, 0);
    }
}
