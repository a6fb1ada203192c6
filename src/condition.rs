// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Condition tree: parsing, evaluation, and equality extraction (spec §4.9).

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// A leaf operator (spec §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Like,
    IsNull,
    IsNotNull,
    In,
}

fn parse_op(raw: &str) -> crate::Result<Op> {
    match raw {
        "=" => Ok(Op::Eq),
        "!=" => Ok(Op::Ne),
        ">" => Ok(Op::Gt),
        "<" => Ok(Op::Lt),
        ">=" => Ok(Op::Ge),
        "<=" => Ok(Op::Le),
        "LIKE" | "like" => Ok(Op::Like),
        "IS NULL" | "is null" => Ok(Op::IsNull),
        "IS NOT NULL" | "is not null" => Ok(Op::IsNotNull),
        "IN" | "in" => Ok(Op::In),
        other => Err(crate::Error::BadRequest(format!("unknown operator {other:?}"))),
    }
}

/// A boolean filter tree, polymorphic over leaf/and/or (spec §3).
#[derive(Clone, Debug)]
pub enum Condition {
    Leaf { op: Op, column: String, target: String },
    And(Vec<Condition>),
    Or(Vec<Condition>),
}

/// Parses a JSON `where` value into a condition tree.
///
/// - Empty object/array → `None` (no condition).
/// - Object without an `operator` key → implicit AND of `=` predicates,
///   one per key, column names lower-cased.
/// - Object with an `operator` key → the tagged tree: `"AND"`/`"OR"` nest
///   `children`, anything else is a leaf with `column` and `value`.
///
/// The stringified target value is computed here, once, per leaf (spec
/// §4.9 "post-pass caches each leaf's stringified target value").
pub fn parse(value: &Value) -> crate::Result<Option<Condition>> {
    match value {
        Value::Null => Ok(None),
        Value::Object(map) if map.is_empty() => Ok(None),
        Value::Array(items) if items.is_empty() => Ok(None),
        Value::Object(map) if !map.contains_key("operator") => {
            let mut children: Vec<Condition> = map
                .iter()
                .map(|(column, target)| Condition::Leaf {
                    op: Op::Eq,
                    column: column.to_lowercase(),
                    target: stringify(target),
                })
                .collect();

            Ok(match children.len() {
                0 => None,
                1 => children.pop(),
                _ => Some(Condition::And(children)),
            })
        }
        Value::Object(map) => {
            let operator = map
                .get("operator")
                .and_then(Value::as_str)
                .ok_or_else(|| crate::Error::BadRequest("missing operator".into()))?;

            match operator.to_uppercase().as_str() {
                "AND" => Ok(Some(Condition::And(parse_children(map)?))),
                "OR" => Ok(Some(Condition::Or(parse_children(map)?))),
                op => {
                    let column = map
                        .get("column")
                        .and_then(Value::as_str)
                        .ok_or_else(|| crate::Error::BadRequest("leaf missing column".into()))?
                        .to_lowercase();
                    let target = map.get("value").map(stringify).unwrap_or_default();

                    Ok(Some(Condition::Leaf {
                        op: parse_op(op)?,
                        column,
                        target,
                    }))
                }
            }
        }
        _ => Err(crate::Error::BadRequest("where must be a JSON object".into())),
    }
}

fn parse_children(map: &serde_json::Map<String, Value>) -> crate::Result<Vec<Condition>> {
    let items = map
        .get("children")
        .and_then(Value::as_array)
        .ok_or_else(|| crate::Error::BadRequest("AND/OR missing children".into()))?;

    items
        .iter()
        .filter_map(|item| parse(item).transpose())
        .collect()
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn is_null_value(value: Option<&String>) -> bool {
    value.map(|v| v.is_empty() || v == "NULL").unwrap_or(true)
}

/// Evaluates `condition` over a row keyed by lower-cased column name.
#[must_use]
pub fn evaluate(condition: &Condition, row: &HashMap<String, String>) -> bool {
    match condition {
        Condition::And(children) => children.iter().all(|c| evaluate(c, row)),
        Condition::Or(children) => children.iter().any(|c| evaluate(c, row)),
        Condition::Leaf { op, column, target } => {
            let value = row.get(column);

            match op {
                Op::IsNull => is_null_value(value),
                Op::IsNotNull => !is_null_value(value),
                Op::Eq => value.map(String::as_str).unwrap_or("") == target,
                Op::Ne => value.map(String::as_str).unwrap_or("") != target,
                Op::Gt => value.map(String::as_str).unwrap_or("") > target.as_str(),
                Op::Lt => value.map(String::as_str).unwrap_or("") < target.as_str(),
                Op::Ge => value.map(String::as_str).unwrap_or("") >= target.as_str(),
                Op::Le => value.map(String::as_str).unwrap_or("") <= target.as_str(),
                Op::Like => value
                    .map(|v| v.to_lowercase().contains(&target.to_lowercase()))
                    .unwrap_or(false),
                Op::In => {
                    let candidates: Vec<String> = serde_json::from_str(target).unwrap_or_default();
                    value.map(|v| candidates.iter().any(|c| c == v)).unwrap_or(false)
                }
            }
        }
    }
}

/// Extracts the top-level equality predicates usable as an index probe
/// key (spec §4.9): `{root.column: root.value}` for a root `=`, the union
/// of direct `=` children for a root AND, empty otherwise.
#[must_use]
pub fn equality_map(condition: &Condition) -> BTreeMap<String, String> {
    match condition {
        Condition::Leaf { op: Op::Eq, column, target } => {
            BTreeMap::from([(column.clone(), target.clone())])
        }
        Condition::And(children) => children
            .iter()
            .filter_map(|c| match c {
                Condition::Leaf { op: Op::Eq, column, target } => Some((column.clone(), target.clone())),
                _ => None,
            })
            .collect(),
        _ => BTreeMap::new(),
    }
}

/// Every column referenced anywhere in the tree, used by the query executor
/// to decide whether an `IndexedScan` is covered (spec §4.10 `CoveredIndex`
/// trigger: "every condition column lies within plan.columns").
#[must_use]
pub fn referenced_columns(condition: &Condition) -> std::collections::BTreeSet<String> {
    let mut out = std::collections::BTreeSet::new();
    collect_columns(condition, &mut out);
    out
}

fn collect_columns(condition: &Condition, out: &mut std::collections::BTreeSet<String>) {
    match condition {
        Condition::Leaf { column, .. } => {
            out.insert(column.clone());
        }
        Condition::And(children) | Condition::Or(children) => {
            for child in children {
                collect_columns(child, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_log::test;

    fn row(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|&(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn empty_condition_parses_to_none() -> crate::Result<()> {
        assert!(parse(&json!({}))?.is_none());
        assert!(parse(&json!([]))?.is_none());
        Ok(())
    }

    #[test]
    fn implicit_equality_map_lowercases_columns() -> crate::Result<()> {
        let condition = parse(&json!({"Dept": "Eng"}))?.expect("some condition");
        let row = row(&[("dept", "Eng")]);
        assert!(evaluate(&condition, &row));

        let equality = equality_map(&condition);
        assert_eq!(Some(&"Eng".to_string()), equality.get("dept"));

        Ok(())
    }

    #[test]
    fn tagged_and_or_tree() -> crate::Result<()> {
        let condition = parse(&json!({
            "operator": "AND",
            "children": [
                {"operator": "=", "column": "dept", "value": "Eng"},
                {"operator": ">", "column": "id", "value": "1"},
            ]
        }))?
        .expect("some condition");

        assert!(evaluate(&condition, &row(&[("dept", "Eng"), ("id", "2")])));
        assert!(!evaluate(&condition, &row(&[("dept", "Eng"), ("id", "1")])));

        Ok(())
    }

    #[test]
    fn like_is_case_insensitive_substring() -> crate::Result<()> {
        let condition = parse(&json!({"operator": "LIKE", "column": "name", "value": "ALI"}))?.expect("cond");
        assert!(evaluate(&condition, &row(&[("name", "Alice")])));
        assert!(!evaluate(&condition, &row(&[("name", "Bob")])));
        Ok(())
    }

    #[test]
    fn is_null_collapses_absent_and_empty() -> crate::Result<()> {
        let condition = parse(&json!({"operator": "IS NULL", "column": "note"}))?.expect("cond");
        assert!(evaluate(&condition, &row(&[])));
        assert!(evaluate(&condition, &row(&[("note", "")])));
        assert!(!evaluate(&condition, &row(&[("note", "x")])));
        Ok(())
    }

    #[test]
    fn in_operator_checks_json_array_membership() -> crate::Result<()> {
        let condition = parse(&json!({"operator": "IN", "column": "dept", "value": ["Eng", "Sales"]}))?.expect("cond");
        assert!(evaluate(&condition, &row(&[("dept", "Eng")])));
        assert!(!evaluate(&condition, &row(&[("dept", "Ops")])));
        Ok(())
    }

    #[test]
    fn referenced_columns_collects_across_tree() -> crate::Result<()> {
        let condition = parse(&json!({
            "operator": "AND",
            "children": [
                {"operator": "=", "column": "dept", "value": "Eng"},
                {"operator": "LIKE", "column": "name", "value": "Ali"},
            ]
        }))?
        .expect("cond");

        let columns = referenced_columns(&condition);
        assert!(columns.contains("dept"));
        assert!(columns.contains("name"));
        assert_eq!(2, columns.len());

        Ok(())
    }

    #[test]
    fn equality_map_empty_for_or_root() -> crate::Result<()> {
        let condition = parse(&json!({
            "operator": "OR",
            "children": [
                {"operator": "=", "column": "dept", "value": "Eng"},
                {"operator": "=", "column": "dept", "value": "Sales"},
            ]
        }))?
        .expect("cond");

        assert!(equality_map(&condition).is_empty());
        Ok(())
    }
}
