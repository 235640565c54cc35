use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::Neo4jSettings;
use crate::cypher::{GraphFragment, quote_name};
use crate::domain::{NodeLabel, PropValue, Props, Rel};
use crate::error::SraGraphError;
use crate::graph::{GraphStore, NodeRecord, PropertyPatch, SampleContext};

#[derive(Serialize)]
struct TxRequest<'a> {
    statements: Vec<TxStatement<'a>>,
}

#[derive(Serialize)]
struct TxStatement<'a> {
    statement: &'a str,
    parameters: Value,
}

#[derive(Deserialize)]
struct TxResponse {
    #[serde(default)]
    results: Vec<TxResult>,
    #[serde(default)]
    errors: Vec<TxError>,
}

#[derive(Deserialize)]
struct TxResult {
    #[serde(default)]
    data: Vec<TxRow>,
}

#[derive(Deserialize)]
struct TxRow {
    #[serde(default)]
    row: Vec<Value>,
}

#[derive(Deserialize)]
struct TxError {
    code: String,
    message: String,
}

/// Neo4j over its HTTP transactional endpoint. Every call is one auto-committed transaction.
#[derive(Clone)]
pub struct Neo4jHttpStore {
    client: Client,
    commit_url: String,
    user: String,
    password: String,
}

impl Neo4jHttpStore {
    pub fn new(settings: &Neo4jSettings) -> Result<Self, SraGraphError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("sra-metagraph/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SraGraphError::GraphHttp(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|err| SraGraphError::GraphHttp(err.to_string()))?;

        Ok(Self {
            client,
            commit_url: format!(
                "{}/db/{}/tx/commit",
                settings.uri.trim_end_matches('/'),
                settings.database
            ),
            user: settings.user.clone(),
            password: settings.password.clone(),
        })
    }

    fn run(&self, statement: &str, parameters: Value) -> Result<Vec<Vec<Value>>, SraGraphError> {
        tracing::debug!(statement, "running cypher");
        let body = TxRequest {
            statements: vec![TxStatement {
                statement,
                parameters,
            }],
        };
        let response = self
            .client
            .post(&self.commit_url)
            .basic_auth(&self.user, Some(&self.password))
            .json(&body)
            .send()
            .map_err(|err| SraGraphError::GraphHttp(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "graph request failed".to_string());
            return Err(SraGraphError::GraphStatus { status, message });
        }

        let payload: TxResponse = response
            .json()
            .map_err(|err| SraGraphError::GraphResponse(err.to_string()))?;
        if let Some(error) = payload.errors.into_iter().next() {
            return Err(SraGraphError::GraphStatement {
                code: error.code,
                message: error.message,
            });
        }
        Ok(payload
            .results
            .into_iter()
            .next()
            .map(|result| result.data.into_iter().map(|row| row.row).collect())
            .unwrap_or_default())
    }

    fn single_count(&self, statement: &str) -> Result<u64, SraGraphError> {
        let rows = self.run(statement, json!({}))?;
        rows.first()
            .and_then(|row| row.first())
            .and_then(Value::as_u64)
            .ok_or_else(|| SraGraphError::GraphResponse(format!("no count from `{statement}`")))
    }
}

impl GraphStore for Neo4jHttpStore {
    fn write_fragment(&self, fragment: &GraphFragment) -> Result<(), SraGraphError> {
        if fragment.is_empty() {
            return Ok(());
        }
        if !fragment.has_bindings() {
            return self.run(&fragment.to_cypher(), json!({})).map(|_| ());
        }
        let rows = self.run(&bound_statement(fragment), json!({}))?;
        ensure_bound(&rows)
    }

    fn scan_nodes(
        &self,
        label: Option<NodeLabel>,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<NodeRecord>, SraGraphError> {
        let pattern = match label {
            Some(label) => format!("(n:{})", quote_name(label.as_str())),
            None => "(n)".to_string(),
        };
        let statement = format!(
            "MATCH {pattern} RETURN id(n), labels(n), properties(n) \
             ORDER BY id(n) SKIP $skip LIMIT $limit"
        );
        let rows = self.run(&statement, json!({ "skip": skip, "limit": limit }))?;
        rows.iter().map(|row| node_from_columns(row, 0)).collect()
    }

    fn replace_properties(&self, patches: &[PropertyPatch]) -> Result<(), SraGraphError> {
        if patches.is_empty() {
            return Ok(());
        }
        let batch =
            serde_json::to_value(patches).map_err(|err| SraGraphError::GraphHttp(err.to_string()))?;
        self.run(
            "UNWIND $batch AS record MATCH (n) WHERE id(n) = record.id SET n = record.props",
            json!({ "batch": batch }),
        )
        .map(|_| ())
    }

    fn unlinked_pairs(
        &self,
        owner: NodeLabel,
        target: NodeLabel,
    ) -> Result<Vec<(i64, i64)>, SraGraphError> {
        let statement = format!(
            "MATCH (a:{}), (b:{}) WHERE a.exp_pkg = b.exp_pkg AND NOT (a)--(b) \
             RETURN id(a), id(b)",
            quote_name(owner.as_str()),
            quote_name(target.as_str())
        );
        let rows = self.run(&statement, json!({}))?;
        rows.iter()
            .map(|row| Ok((int_column(row, 0)?, int_column(row, 1)?)))
            .collect()
    }

    fn create_relationships(&self, rel: Rel, pairs: &[(i64, i64)]) -> Result<(), SraGraphError> {
        if pairs.is_empty() {
            return Ok(());
        }
        let statement = format!(
            "UNWIND $batch AS pair MATCH (a) WHERE id(a) = pair[0] \
             MATCH (b) WHERE id(b) = pair[1] CREATE (a)-[:{}]->(b)",
            quote_name(rel.as_str())
        );
        let batch: Vec<[i64; 2]> = pairs.iter().map(|(from, to)| [*from, *to]).collect();
        self.run(&statement, json!({ "batch": batch })).map(|_| ())
    }

    fn sample_contexts(&self, external_id: &str) -> Result<Vec<SampleContext>, SraGraphError> {
        let rows = self.run(
            "MATCH (stu:study)--(sam:sample)--(satt:sample_attrib) WHERE sam.EXTERNAL_ID = $id \
             RETURN id(stu), labels(stu), properties(stu), \
                    id(sam), labels(sam), properties(sam), \
                    id(satt), labels(satt), properties(satt)",
            json!({ "id": external_id }),
        )?;
        rows.iter()
            .map(|row| {
                Ok(SampleContext {
                    study: node_from_columns(row, 0)?,
                    sample: node_from_columns(row, 3)?,
                    attrib: node_from_columns(row, 6)?,
                })
            })
            .collect()
    }

    fn count_nodes(&self) -> Result<u64, SraGraphError> {
        self.single_count("MATCH (n) RETURN count(n)")
    }

    fn count_relationships(&self) -> Result<u64, SraGraphError> {
        self.single_count("MATCH ()-[r]->() RETURN count(r)")
    }

    fn clear(&self) -> Result<(), SraGraphError> {
        self.run("MATCH (n) DETACH DELETE n", json!({})).map(|_| ())
    }
}

/// A missing bound node makes the leading `MATCH` empty and the write a no-op;
/// counting the matched rows exposes that.
fn bound_statement(fragment: &GraphFragment) -> String {
    format!("{} RETURN count(*)", fragment.to_cypher())
}

fn ensure_bound(rows: &[Vec<Value>]) -> Result<(), SraGraphError> {
    match rows.first().and_then(|row| row.first()).and_then(Value::as_u64) {
        Some(matched) if matched > 0 => Ok(()),
        _ => Err(SraGraphError::GraphResponse(
            "bound node no longer exists, nothing was written".to_string(),
        )),
    }
}

fn int_column(row: &[Value], index: usize) -> Result<i64, SraGraphError> {
    row.get(index)
        .and_then(Value::as_i64)
        .ok_or_else(|| SraGraphError::GraphResponse(format!("column {index} is not an id")))
}

/// Reads `id, labels, properties` starting at column `start`.
fn node_from_columns(row: &[Value], start: usize) -> Result<NodeRecord, SraGraphError> {
    let id = int_column(row, start)?;
    let labels = row
        .get(start + 1)
        .and_then(Value::as_array)
        .map(|labels| {
            labels
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let props = row
        .get(start + 2)
        .and_then(Value::as_object)
        .map(|object| {
            object
                .iter()
                .filter_map(|(key, value)| PropValue::from_json(value).map(|value| (key.clone(), value)))
                .collect::<Props>()
        })
        .unwrap_or_default();
    Ok(NodeRecord { id, labels, props })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_columns_are_decoded() {
        let row = vec![
            json!(12),
            json!(["bases"]),
            json!({"count": "10", "GC_Ratio": 0.5, "exp_pkg": 3}),
        ];
        let node = node_from_columns(&row, 0).unwrap();
        assert_eq!(node.id, 12);
        assert!(node.has_label(NodeLabel::Bases));
        assert_eq!(node.props["count"], PropValue::from("10"));
        assert_eq!(node.props["GC_Ratio"], PropValue::Float(0.5));
        assert_eq!(node.props["exp_pkg"], PropValue::Int(3));
    }

    #[test]
    fn rewrites_keep_bool_and_list_properties() {
        let row = vec![
            json!(4),
            json!(["run"]),
            json!({"alias": "R1", "paired": true, "lanes": [1, 2], "tags": ["a", "b"]}),
        ];
        let node = node_from_columns(&row, 0).unwrap();
        assert_eq!(node.props["paired"], PropValue::Bool(true));
        assert_eq!(
            node.props["tags"],
            PropValue::List(vec![PropValue::from("a"), PropValue::from("b")])
        );

        let patch = PropertyPatch {
            id: node.id,
            props: node.props,
        };
        assert_eq!(
            serde_json::to_value(&patch).unwrap(),
            json!({"id": 4, "props": {"alias": "R1", "paired": true, "lanes": [1, 2], "tags": ["a", "b"]}})
        );
    }

    #[test]
    fn bound_fragments_count_their_matches() {
        let mut fragment = GraphFragment::new();
        fragment.bind("stu", 42).unwrap();
        fragment
            .node("ably", NodeLabel::Assembly, Props::from([("accession".to_string(), "GCA_1".into())]))
            .unwrap();
        fragment.merge_relation("stu", Rel::HasAssembly, "ably").unwrap();

        let statement = bound_statement(&fragment);
        assert!(statement.starts_with("MATCH (stu) WHERE id(stu) = 42 "));
        assert!(statement.ends_with(" RETURN count(*)"));

        assert!(ensure_bound(&[vec![json!(1)]]).is_ok());
        assert!(matches!(
            ensure_bound(&[vec![json!(0)]]),
            Err(SraGraphError::GraphResponse(_))
        ));
        assert!(ensure_bound(&[]).is_err());
    }

    #[test]
    fn statement_errors_are_surfaced() {
        let payload: TxResponse = serde_json::from_value(json!({
            "results": [],
            "errors": [{"code": "Neo.ClientError.Statement.SyntaxError", "message": "bad"}]
        }))
        .unwrap();
        assert_eq!(payload.errors[0].code, "Neo.ClientError.Statement.SyntaxError");
    }
}
