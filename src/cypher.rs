use std::collections::BTreeSet;
use std::fmt::Write as _;

use crate::domain::{AttrValue, Identity, NodeLabel, PropValue, Props, Rel};
use crate::error::SraGraphError;
use crate::escape::escape_value;

/// One step of a record's write batch.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphOp {
    /// Binds `var` to an already stored node.
    Bind { var: String, id: i64 },
    Node {
        var: String,
        label: NodeLabel,
        props: Props,
        identity: Identity,
    },
    Relate {
        from: String,
        rel: Rel,
        to: String,
        props: Props,
        merge: bool,
    },
}

/// Ordered create/merge batch written as a single transaction.
///
/// Variables must be declared (by [`GraphFragment::node`] or
/// [`GraphFragment::bind`]) before a relationship can reference them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphFragment {
    ops: Vec<GraphOp>,
    vars: BTreeSet<String>,
}

impl GraphFragment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> &[GraphOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// True when the batch refers to nodes that must already exist.
    pub fn has_bindings(&self) -> bool {
        self.ops.iter().any(|op| matches!(op, GraphOp::Bind { .. }))
    }

    pub fn has_var(&self, var: &str) -> bool {
        self.vars.contains(var)
    }

    pub fn bind(&mut self, var: impl Into<String>, id: i64) -> Result<(), SraGraphError> {
        let var = self.declare(var.into())?;
        self.ops.push(GraphOp::Bind { var, id });
        Ok(())
    }

    /// Adds a node. Whether it is created or merged follows the label's identity policy.
    ///
    /// A merge without attributes would match any node of the label, so such
    /// nodes are always created.
    pub fn node(
        &mut self,
        var: impl Into<String>,
        label: NodeLabel,
        props: Props,
    ) -> Result<(), SraGraphError> {
        let var = self.declare(var.into())?;
        let identity = match label.identity() {
            Identity::MergeByAttributes if props.is_empty() => {
                tracing::warn!(label = label.as_str(), "node without attributes is created, not merged");
                Identity::Fresh
            }
            identity => identity,
        };
        self.ops.push(GraphOp::Node {
            var,
            label,
            props,
            identity,
        });
        Ok(())
    }

    pub fn relate(&mut self, from: &str, rel: Rel, to: &str) -> Result<(), SraGraphError> {
        self.relate_with(from, rel, to, Props::new(), false)
    }

    pub fn merge_relation(&mut self, from: &str, rel: Rel, to: &str) -> Result<(), SraGraphError> {
        self.relate_with(from, rel, to, Props::new(), true)
    }

    pub fn relate_with(
        &mut self,
        from: &str,
        rel: Rel,
        to: &str,
        props: Props,
        merge: bool,
    ) -> Result<(), SraGraphError> {
        for var in [from, to] {
            if !self.vars.contains(var) {
                return Err(SraGraphError::UndefinedVariable(var.to_string()));
            }
        }
        self.ops.push(GraphOp::Relate {
            from: from.to_string(),
            rel,
            to: to.to_string(),
            props,
            merge,
        });
        Ok(())
    }

    /// Renders the batch as one Cypher statement. Bindings come first.
    pub fn to_cypher(&self) -> String {
        let mut clauses = Vec::with_capacity(self.ops.len());
        for op in &self.ops {
            if let GraphOp::Bind { var, id } = op {
                clauses.push(format!("MATCH ({var}) WHERE id({var}) = {id}"));
            }
        }
        for op in &self.ops {
            match op {
                GraphOp::Bind { .. } => {}
                GraphOp::Node {
                    var,
                    label,
                    props,
                    identity,
                } => {
                    let verb = match identity {
                        Identity::Fresh => "CREATE",
                        Identity::MergeByAttributes => "MERGE",
                    };
                    let mut clause = format!("{verb} ({var}:{}", quote_name(label.as_str()));
                    if !props.is_empty() {
                        clause.push(' ');
                        clause.push_str(&render_props(props));
                    }
                    clause.push(')');
                    clauses.push(clause);
                }
                GraphOp::Relate {
                    from,
                    rel,
                    to,
                    props,
                    merge,
                } => {
                    let verb = if *merge { "MERGE" } else { "CREATE" };
                    let mut clause = format!("{verb} ({from})-[:{}", quote_name(rel.as_str()));
                    if !props.is_empty() {
                        clause.push(' ');
                        clause.push_str(&render_props(props));
                    }
                    let _ = write!(clause, "]->({to})");
                    clauses.push(clause);
                }
            }
        }
        clauses.join(" ")
    }

    fn declare(&mut self, var: String) -> Result<String, SraGraphError> {
        if !self.vars.insert(var.clone()) {
            return Err(SraGraphError::DuplicateVariable(var));
        }
        Ok(var)
    }
}

pub fn quote_name(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Property map literal, e.g. ``{`alias`: "x", `spots`: 12}``.
pub fn render_props(props: &Props) -> String {
    render_literal(&escape_value(&AttrValue::from(props))).unwrap_or_else(|| "{}".to_string())
}

/// Renders an escaped value. Non-finite floats have no literal and are dropped.
fn render_literal(value: &AttrValue) -> Option<String> {
    match value {
        AttrValue::Scalar(PropValue::Str(text)) => Some(format!("\"{text}\"")),
        AttrValue::Scalar(PropValue::Int(number)) => Some(number.to_string()),
        AttrValue::Scalar(PropValue::Bool(flag)) => Some(flag.to_string()),
        AttrValue::Scalar(PropValue::List(items)) => {
            render_literal(&AttrValue::from(PropValue::List(items.clone())))
        }
        AttrValue::Scalar(PropValue::Float(number)) if number.is_finite() => {
            Some(format!("{number:?}"))
        }
        AttrValue::Scalar(PropValue::Float(number)) => {
            tracing::debug!(value = %number, "skipping non-finite property value");
            None
        }
        AttrValue::List(items) => {
            let items: Vec<String> = items.iter().filter_map(render_literal).collect();
            Some(format!("[{}]", items.join(", ")))
        }
        AttrValue::Map(entries) => {
            let entries: Vec<String> = entries
                .iter()
                .filter_map(|(key, value)| {
                    render_literal(value).map(|literal| format!("{}: {literal}", quote_name(key)))
                })
                .collect();
            Some(format!("{{{}}}", entries.join(", ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn props(pairs: &[(&str, PropValue)]) -> Props {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn identity_policy_picks_the_verb() {
        let mut fragment = GraphFragment::new();
        fragment
            .node("exp", NodeLabel::Experiment, props(&[("exp_pkg", PropValue::Int(7))]))
            .unwrap();
        fragment
            .node("inst", NodeLabel::Platform, props(&[("type", "ILLUMINA".into())]))
            .unwrap();
        fragment.relate("exp", Rel::UsingInstrument, "inst").unwrap();

        assert_eq!(
            fragment.to_cypher(),
            "CREATE (exp:`experiment` {`exp_pkg`: 7}) \
             MERGE (inst:`platform` {`type`: \"ILLUMINA\"}) \
             CREATE (exp)-[:`usingInstrument`]->(inst)"
        );
    }

    #[test]
    fn merge_without_attributes_becomes_create() {
        let mut fragment = GraphFragment::new();
        fragment.node("inst", NodeLabel::Platform, Props::new()).unwrap();
        assert_eq!(fragment.to_cypher(), "CREATE (inst:`platform`)");
    }

    #[test]
    fn bindings_render_before_writes() {
        let mut fragment = GraphFragment::new();
        fragment
            .node("ably", NodeLabel::Assembly, props(&[("note", "a \"b\"".into())]))
            .unwrap();
        fragment.bind("stu", 42).unwrap();
        fragment.relate("stu", Rel::HasAssembly, "ably").unwrap();

        let cypher = fragment.to_cypher();
        assert!(cypher.starts_with("MATCH (stu) WHERE id(stu) = 42 MERGE (ably:`assembly`"));
        assert!(cypher.contains(r#"`note`: "a \"b\"""#));
    }

    #[test]
    fn bool_and_list_literals() {
        let rendered = render_props(&props(&[
            ("paired", PropValue::Bool(true)),
            ("tags", PropValue::List(vec!["a\"b".into(), PropValue::Int(2)])),
        ]));
        assert_eq!(rendered, r#"{`paired`: true, `tags`: ["a\"b", 2]}"#);
    }

    #[test]
    fn undefined_variable_rejected() {
        let mut fragment = GraphFragment::new();
        fragment.node("run0", NodeLabel::Run, Props::new()).unwrap();
        assert_matches!(
            fragment.relate("exp", Rel::HasRun, "run0"),
            Err(SraGraphError::UndefinedVariable(var)) if var == "exp"
        );
    }

    #[test]
    fn relationship_properties_and_float_literals() {
        let mut fragment = GraphFragment::new();
        fragment.node("run0", NodeLabel::Run, Props::new()).unwrap();
        fragment.node("rd", NodeLabel::Read, Props::new()).unwrap();
        fragment
            .relate_with(
                "run0",
                Rel::ReadStatistics,
                "rd",
                props(&[("average", PropValue::Float(150.0)), ("nan", PropValue::Float(f64::NAN))]),
                false,
            )
            .unwrap();
        assert!(
            fragment
                .to_cypher()
                .ends_with("CREATE (run0)-[:`readStatistics` {`average`: 150.0}]->(rd)")
        );
    }
}
