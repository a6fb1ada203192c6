// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Streaming group-by accumulator (spec §4.10 "Aggregator semantics").

use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

/// A supported aggregation function, or none (positional/count-only queries).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggFunc {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

/// Parses an `agg_func` request field (spec §6).
pub fn parse_agg_func(raw: &str) -> crate::Result<Option<AggFunc>> {
    match raw {
        "" => Ok(None),
        "count" => Ok(Some(AggFunc::Count)),
        "sum" => Ok(Some(AggFunc::Sum)),
        "min" => Ok(Some(AggFunc::Min)),
        "max" => Ok(Some(AggFunc::Max)),
        "avg" => Ok(Some(AggFunc::Avg)),
        other => Err(crate::Error::BadRequest(format!("unknown agg_func {other:?}"))),
    }
}

/// Streaming accumulator keyed by group value.
///
/// Per the decision recorded for spec §9's open point, a value that is
/// missing or fails to parse as a number is treated as absent from both
/// `sum`/`avg`'s running total and `avg`'s divisor, rather than
/// contributing a `0`.
pub struct Aggregator {
    func: AggFunc,
    sums: BTreeMap<String, f64>,
    counts: BTreeMap<String, u64>,
    mins: BTreeMap<String, f64>,
    maxs: BTreeMap<String, f64>,
}

impl Aggregator {
    #[must_use]
    pub fn new(func: AggFunc) -> Self {
        Self {
            func,
            sums: BTreeMap::new(),
            counts: BTreeMap::new(),
            mins: BTreeMap::new(),
            maxs: BTreeMap::new(),
        }
    }

    /// Feeds one `(group, raw_value)` observation.
    pub fn observe(&mut self, group: &str, raw_value: Option<&str>) {
        match self.func {
            AggFunc::Count => {
                *self.counts.entry(group.to_string()).or_insert(0) += 1;
            }
            AggFunc::Sum => {
                if let Some(x) = parse_number(raw_value) {
                    *self.sums.entry(group.to_string()).or_insert(0.0) += x;
                }
            }
            AggFunc::Min => {
                if let Some(x) = parse_number(raw_value) {
                    self.mins
                        .entry(group.to_string())
                        .and_modify(|m| {
                            if x < *m {
                                *m = x;
                            }
                        })
                        .or_insert(x);
                }
            }
            AggFunc::Max => {
                if let Some(x) = parse_number(raw_value) {
                    self.maxs
                        .entry(group.to_string())
                        .and_modify(|m| {
                            if x > *m {
                                *m = x;
                            }
                        })
                        .or_insert(x);
                }
            }
            AggFunc::Avg => {
                if let Some(x) = parse_number(raw_value) {
                    *self.sums.entry(group.to_string()).or_insert(0.0) += x;
                    *self.counts.entry(group.to_string()).or_insert(0) += 1;
                }
            }
        }
    }

    /// Fast-path update from a block's metadata alone, used by `GroupByIndex`
    /// when `agg_func` is `count` (or empty) and the block is flagged
    /// `is_distinct` (spec §4.10 `GroupByIndex` strategy).
    pub fn observe_block_count(&mut self, group: &str, record_count: u64) {
        *self.counts.entry(group.to_string()).or_insert(0) += record_count;
    }

    /// Finalizes into the query's output JSON object: group value → number.
    #[must_use]
    pub fn finalize(self) -> Map<String, Value> {
        match self.func {
            AggFunc::Count => self
                .counts
                .into_iter()
                .map(|(g, c)| (g, Value::Number(c.into())))
                .collect(),
            AggFunc::Sum => self
                .sums
                .into_iter()
                .map(|(g, s)| (g, number_value(s)))
                .collect(),
            AggFunc::Min => self
                .mins
                .into_iter()
                .map(|(g, m)| (g, number_value(m)))
                .collect(),
            AggFunc::Max => self
                .maxs
                .into_iter()
                .map(|(g, m)| (g, number_value(m)))
                .collect(),
            AggFunc::Avg => {
                let mut out = Map::new();
                for (group, sum) in self.sums {
                    let count = self.counts.get(&group).copied().unwrap_or(0);
                    if count > 0 {
                        out.insert(group, number_value(sum / count as f64));
                    }
                }
                out
            }
        }
    }
}

fn parse_number(raw: Option<&str>) -> Option<f64> {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
}

fn number_value(x: f64) -> Value {
    Number::from_f64(x).map(Value::Number).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn count_groups_ignore_value() {
        let mut agg = Aggregator::new(AggFunc::Count);
        agg.observe("Eng", None);
        agg.observe("Eng", None);
        agg.observe("Sales", None);

        let result = agg.finalize();
        assert_eq!(Some(&Value::from(2)), result.get("Eng"));
        assert_eq!(Some(&Value::from(1)), result.get("Sales"));
    }

    #[test]
    fn sum_skips_unparseable_values() {
        let mut agg = Aggregator::new(AggFunc::Sum);
        agg.observe("Eng", Some("10"));
        agg.observe("Eng", Some("oops"));
        agg.observe("Eng", Some("5"));

        let result = agg.finalize();
        assert_eq!(Some(&Value::from(15.0)), result.get("Eng"));
    }

    #[test]
    fn avg_excludes_unparseable_from_divisor() {
        let mut agg = Aggregator::new(AggFunc::Avg);
        agg.observe("Eng", Some("10"));
        agg.observe("Eng", Some("oops"));
        agg.observe("Eng", Some("20"));

        let result = agg.finalize();
        assert_eq!(Some(&Value::from(15.0)), result.get("Eng"));
    }

    #[test]
    fn min_and_max_track_bounds() {
        let mut agg = Aggregator::new(AggFunc::Min);
        agg.observe("Eng", Some("5"));
        agg.observe("Eng", Some("2"));
        agg.observe("Eng", Some("9"));
        assert_eq!(Some(&Value::from(2.0)), agg.finalize().get("Eng"));

        let mut agg = Aggregator::new(AggFunc::Max);
        agg.observe("Eng", Some("5"));
        agg.observe("Eng", Some("2"));
        agg.observe("Eng", Some("9"));
        assert_eq!(Some(&Value::from(9.0)), agg.finalize().get("Eng"));
    }

    #[test]
    fn group_with_no_parseable_values_is_absent_from_avg() {
        let mut agg = Aggregator::new(AggFunc::Avg);
        agg.observe("Eng", Some("oops"));
        assert!(agg.finalize().get("Eng").is_none());
    }
}
