use assert_matches::assert_matches;

use sra_metagraph::date::{DateNormalizer, UNKNOWN};
use sra_metagraph::domain::{Identity, NodeLabel, PropValue, SearchQuery};
use sra_metagraph::error::SraGraphError;
use sra_metagraph::geo::{is_well_formed, normalize_geo_loc_name};

#[test]
fn parse_search_query_trims() {
    let query: SearchQuery = "  \"human gut\"[Organism] AND amplicon ".parse().unwrap();
    assert_eq!(query.as_str(), "\"human gut\"[Organism] AND amplicon");
}

#[test]
fn parse_search_query_blank() {
    let err = " \t".parse::<SearchQuery>().unwrap_err();
    assert_matches!(err, SraGraphError::InvalidQuery(_));
}

#[test]
fn parse_node_label() {
    let label: NodeLabel = "sample_attrib".parse().unwrap();
    assert_eq!(label, NodeLabel::SampleAttrib);
    assert_matches!("galaxy".parse::<NodeLabel>(), Err(SraGraphError::InvalidLabel(_)));
}

#[test]
fn per_record_kinds_are_fresh() {
    for label in [NodeLabel::Run, NodeLabel::Read, NodeLabel::Bases, NodeLabel::Member] {
        assert_eq!(label.identity(), Identity::Fresh, "{label}");
    }
    for label in [NodeLabel::Study, NodeLabel::Sample, NodeLabel::Organization] {
        assert_eq!(label.identity(), Identity::MergeByAttributes, "{label}");
    }
}

#[test]
fn prop_value_from_json() {
    assert_eq!(PropValue::from_json(&serde_json::json!(12)), Some(PropValue::Int(12)));
    assert_eq!(PropValue::from_json(&serde_json::json!(0.5)), Some(PropValue::Float(0.5)));
    assert_eq!(PropValue::from_json(&serde_json::json!("x")), Some(PropValue::from("x")));
    assert_eq!(PropValue::from_json(&serde_json::json!(null)), None);
    assert_eq!(PropValue::from_json(&serde_json::json!(false)), Some(PropValue::Bool(false)));
    assert_eq!(
        PropValue::from_json(&serde_json::json!([3, "x"])),
        Some(PropValue::List(vec![PropValue::Int(3), PropValue::from("x")]))
    );
    assert_eq!(PropValue::from_json(&serde_json::json!({"k": 1})), None);
}

#[test]
fn dates_in_common_submitter_formats() {
    let dates = DateNormalizer::with_current_year(2024);
    assert_eq!(dates.normalize_or_unknown("2019"), "2019-01-01");
    assert_eq!(dates.normalize_or_unknown("03.2018"), "2018-03-01");
    assert_eq!(dates.normalize_or_unknown("2017-06"), "2017-06-01");
    assert_eq!(dates.normalize_or_unknown("5 June 2016"), "2016-06-05");
    assert_eq!(dates.normalize_or_unknown("2015/2016"), "2016-01-01");
    assert_eq!(dates.normalize_or_unknown("not collected"), UNKNOWN);
}

#[test]
fn geo_loc_name_shape() {
    assert_eq!(normalize_geo_loc_name("Kenya: Nairobi"), "Kenya:Nairobi");
    assert!(is_well_formed("kenya:nairobi"));
    assert!(!is_well_formed("kenya"));
    assert!(!is_well_formed(":nairobi"));
}
