use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;

use crate::config::EntrezSettings;
use crate::error::SraGraphError;
use crate::xml::{XmlElement, parse_document};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrezDb {
    Sra,
    Assembly,
}

impl EntrezDb {
    pub fn as_str(self) -> &'static str {
        match self {
            EntrezDb::Sra => "sra",
            EntrezDb::Assembly => "assembly",
        }
    }
}

/// One esearch term against one database, optionally restricted to a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrezSearch {
    pub db: EntrezDb,
    pub term: String,
    pub field: Option<String>,
}

impl EntrezSearch {
    pub fn sra(term: impl Into<String>) -> Self {
        Self {
            db: EntrezDb::Sra,
            term: term.into(),
            field: None,
        }
    }

    /// Latest assemblies built from any of `samples`.
    pub fn assemblies_for_samples(samples: &[String]) -> Self {
        Self {
            db: EntrezDb::Assembly,
            term: format!("({}) AND (latest[filter])", samples.join(" OR ")),
            field: Some("BioSample".to_string()),
        }
    }
}

pub trait EntrezClient: Send + Sync {
    fn search_count(&self, search: &EntrezSearch) -> Result<u64, SraGraphError>;
    fn search_ids(
        &self,
        search: &EntrezSearch,
        retstart: u64,
        retmax: usize,
    ) -> Result<Vec<String>, SraGraphError>;
    /// One `EXPERIMENT_PACKAGE` element per fetched record.
    fn fetch_sra_packages(&self, ids: &[String]) -> Result<Vec<XmlElement>, SraGraphError>;
    /// One `DocumentSummary` element per assembly.
    fn fetch_assembly_summaries(&self, ids: &[String])
    -> Result<Vec<XmlElement>, SraGraphError>;
}

#[derive(Deserialize)]
struct SearchEnvelope {
    esearchresult: Option<SearchResult>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct SearchResult {
    count: Option<String>,
    #[serde(default)]
    idlist: Vec<String>,
    #[serde(rename = "ERROR")]
    error: Option<String>,
}

#[derive(Clone)]
pub struct EntrezHttpClient {
    client: Client,
    base_url: String,
    tool: String,
    email: Option<String>,
    api_key: Option<String>,
}

impl EntrezHttpClient {
    pub fn new(settings: &EntrezSettings) -> Result<Self, SraGraphError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("sra-metagraph/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SraGraphError::EntrezHttp(err.to_string()))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|err| SraGraphError::EntrezHttp(err.to_string()))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            tool: settings.tool.clone(),
            email: settings.email.clone(),
            api_key: settings.api_key.clone(),
        })
    }

    fn identity(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("tool", self.tool.clone())];
        if let Some(email) = &self.email {
            params.push(("email", email.clone()));
        }
        if let Some(api_key) = &self.api_key {
            params.push(("api_key", api_key.clone()));
        }
        params
    }

    fn send(&self, request: RequestBuilder) -> Result<Response, SraGraphError> {
        let response = request
            .send()
            .map_err(|err| SraGraphError::EntrezHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "Entrez request failed".to_string());
            return Err(SraGraphError::EntrezStatus { status, message });
        }
        Ok(response)
    }

    fn esearch(
        &self,
        search: &EntrezSearch,
        extra: &[(&str, String)],
    ) -> Result<SearchResult, SraGraphError> {
        let url = format!("{}/esearch.fcgi", self.base_url);
        let mut params = vec![
            ("db", search.db.as_str().to_string()),
            ("term", search.term.clone()),
            ("retmode", "json".to_string()),
        ];
        if let Some(field) = &search.field {
            params.push(("field", field.clone()));
        }
        params.extend(extra.iter().map(|(key, value)| (*key, value.clone())));
        params.extend(self.identity());

        let envelope: SearchEnvelope = self
            .send(self.client.post(&url).form(&params))?
            .json()
            .map_err(|err| SraGraphError::EntrezResponse(err.to_string()))?;
        if let Some(error) = envelope.error {
            return Err(SraGraphError::EntrezResponse(error));
        }
        let result = envelope
            .esearchresult
            .ok_or_else(|| SraGraphError::EntrezResponse("missing esearchresult".to_string()))?;
        if let Some(error) = &result.error {
            return Err(SraGraphError::EntrezResponse(error.clone()));
        }
        Ok(result)
    }

    fn fetch_xml(
        &self,
        endpoint: &str,
        db: EntrezDb,
        ids: &[String],
    ) -> Result<XmlElement, SraGraphError> {
        let url = format!("{}/{endpoint}", self.base_url);
        let mut params = vec![
            ("db", db.as_str().to_string()),
            ("id", ids.join(",")),
            ("retmode", "xml".to_string()),
        ];
        params.extend(self.identity());

        let body = self
            .send(self.client.post(&url).form(&params))?
            .text()
            .map_err(|err| SraGraphError::EntrezHttp(err.to_string()))?;
        let root = parse_document(&body)?;
        if root.tag == "ERROR" || root.tag == "eFetchResult" {
            let message = root
                .text()
                .or_else(|| root.child("ERROR").and_then(XmlElement::text))
                .unwrap_or("Entrez returned an error document");
            return Err(SraGraphError::EntrezResponse(message.to_string()));
        }
        Ok(root)
    }
}

impl EntrezClient for EntrezHttpClient {
    fn search_count(&self, search: &EntrezSearch) -> Result<u64, SraGraphError> {
        let result = self.esearch(search, &[("rettype", "count".to_string())])?;
        parse_count(result.count.as_deref())
    }

    fn search_ids(
        &self,
        search: &EntrezSearch,
        retstart: u64,
        retmax: usize,
    ) -> Result<Vec<String>, SraGraphError> {
        let result = self.esearch(
            search,
            &[
                ("retstart", retstart.to_string()),
                ("retmax", retmax.to_string()),
            ],
        )?;
        Ok(result.idlist)
    }

    fn fetch_sra_packages(&self, ids: &[String]) -> Result<Vec<XmlElement>, SraGraphError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let root = self.fetch_xml("efetch.fcgi", EntrezDb::Sra, ids)?;
        Ok(split_packages(root))
    }

    fn fetch_assembly_summaries(
        &self,
        ids: &[String],
    ) -> Result<Vec<XmlElement>, SraGraphError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let root = self.fetch_xml("esummary.fcgi", EntrezDb::Assembly, ids)?;
        Ok(split_summaries(root))
    }
}

fn parse_count(count: Option<&str>) -> Result<u64, SraGraphError> {
    let count = count.ok_or_else(|| SraGraphError::EntrezResponse("missing count".to_string()))?;
    count
        .trim()
        .parse()
        .map_err(|_| SraGraphError::EntrezResponse(format!("count is not a number: {count}")))
}

/// `EXPERIMENT_PACKAGE_SET` children, or the root itself when a single package came back.
pub fn split_packages(root: XmlElement) -> Vec<XmlElement> {
    if root.tag == "EXPERIMENT_PACKAGE" {
        return vec![root];
    }
    root.children
        .into_iter()
        .filter(|child| child.tag == "EXPERIMENT_PACKAGE")
        .collect()
}

pub fn split_summaries(root: XmlElement) -> Vec<XmlElement> {
    let set = if root.tag == "DocumentSummarySet" {
        root
    } else {
        match root
            .children
            .into_iter()
            .find(|child| child.tag == "DocumentSummarySet")
        {
            Some(set) => set,
            None => return Vec::new(),
        }
    };
    set.children
        .into_iter()
        .filter(|child| child.tag == "DocumentSummary")
        .collect()
}
