// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Index selection (spec §4.10 "Planner"): given the WHERE clause's
//! equality map (or a `group_by` column), find the most specific existing
//! `.cidx` file and build the search key the executor will probe with.

use super::QueryPlan;
use crate::condition::{self, Condition};
use crate::csv_row;
use crate::metadata::Metadata;
use std::path::{Path, PathBuf};

/// The chosen execution strategy, carrying whatever the executor needs to
/// run it (spec §4.10 "Strategies").
pub enum Strategy {
    CountAll,
    FullScan,
    IndexedScan {
        index_path: PathBuf,
        search_key: Vec<u8>,
        covered: bool,
    },
    GroupByIndex {
        index_path: PathBuf,
    },
}

pub struct Plan {
    pub strategy: Strategy,
    pub explain: QueryPlan,
}

fn candidate_path(index_dir: &Path, csv_stem: &str, columns: &[String]) -> PathBuf {
    index_dir.join(format!("{csv_stem}_{}.cidx", columns.join("_")))
}

fn metadata_path(index_dir: &Path, csv_stem: &str) -> PathBuf {
    index_dir.join(format!("{csv_stem}_meta.json"))
}

/// `true` if the CSV's indexes (as a whole) should be treated as usable:
/// no metadata sidecar at all is not an error (best-effort staleness
/// signal only), but a sidecar that disagrees with the live CSV is treated
/// like an index-open I/O failure (SPEC_FULL.md "Fingerprint staleness
/// check at query time" supplement) — fall straight through to `FullScan`
/// or `CountAll` without trying any candidate.
fn indexes_are_fresh(index_dir: &Path, csv_stem: &str, csv_path: &Path) -> bool {
    match Metadata::read_from_file(&metadata_path(index_dir, csv_stem)) {
        Ok(meta) => match meta.is_stale(csv_path) {
            Ok(stale) => {
                if stale {
                    log::warn!("index metadata for {csv_stem} is stale, falling back to full scan");
                }
                !stale
            }
            Err(e) => {
                log::warn!("failed to fingerprint {}: {e}", csv_path.display());
                false
            }
        },
        Err(_) => true,
    }
}

fn build_search_key(columns: &[String], equality: &std::collections::BTreeMap<String, String>) -> Vec<u8> {
    if columns.len() == 1 {
        equality[&columns[0]].as_bytes().to_vec()
    } else {
        let values: Vec<&[u8]> = columns.iter().map(|c| equality[c].as_bytes()).collect();
        csv_row::composite_key(&values)
    }
}

fn is_covered(condition: &Condition, plan_columns: &[String]) -> bool {
    let plan_set: std::collections::BTreeSet<&str> = plan_columns.iter().map(String::as_str).collect();
    condition::referenced_columns(condition)
        .iter()
        .all(|c| plan_set.contains(c.as_str()))
}

/// Chooses a strategy (spec §4.10 "Planner" + "Strategies").
#[must_use]
pub fn choose(
    index_dir: &Path,
    csv_path: &Path,
    condition: Option<&Condition>,
    group_by: Option<&str>,
    count_only: bool,
    overrides_present: bool,
) -> Plan {
    if overrides_present {
        log::debug!("overrides present, forcing full scan");
        return full_scan_plan();
    }

    let csv_stem = super::csv_stem(csv_path);
    let indexes_usable = indexes_are_fresh(index_dir, &csv_stem, csv_path);

    if indexes_usable {
        if let Some(condition) = condition {
            let equality = condition::equality_map(condition);
            if !equality.is_empty() {
                let mut columns: Vec<String> = equality.keys().cloned().collect();
                columns.sort();

                for i in (1..=columns.len()).rev() {
                    let prefix = columns[..i].to_vec();
                    let index_path = candidate_path(index_dir, &csv_stem, &prefix);
                    if index_path.exists() {
                        let search_key = build_search_key(&prefix, &equality);
                        let covered = is_covered(condition, &prefix);

                        log::debug!("planner selected {} (covered={covered})", index_path.display());

                        let explain = QueryPlan {
                            strategy: if covered { "CoveredIndex" } else { "IndexedScan" },
                            index_file: Some(index_path.display().to_string()),
                            search_key: Some(String::from_utf8_lossy(&search_key).into_owned()),
                            covered,
                        };

                        return Plan {
                            strategy: Strategy::IndexedScan { index_path, search_key, covered },
                            explain,
                        };
                    }
                }
            }
        }

        if let Some(group_col) = group_by {
            let normalized = group_col.to_lowercase();
            let index_path = candidate_path(index_dir, &csv_stem, &[normalized]);
            if index_path.exists() {
                log::debug!("planner selected group-by index {}", index_path.display());
                let explain = QueryPlan {
                    strategy: "GroupByIndex",
                    index_file: Some(index_path.display().to_string()),
                    search_key: None,
                    covered: false,
                };
                return Plan {
                    strategy: Strategy::GroupByIndex { index_path },
                    explain,
                };
            }
        }
    }

    if count_only && condition.is_none() && group_by.is_none() {
        return Plan {
            strategy: Strategy::CountAll,
            explain: QueryPlan {
                strategy: "CountAll",
                index_file: None,
                search_key: None,
                covered: false,
            },
        };
    }

    full_scan_plan()
}

fn full_scan_plan() -> Plan {
    Plan {
        strategy: Strategy::FullScan,
        explain: QueryPlan {
            strategy: "FullScan",
            index_file: None,
            search_key: None,
            covered: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition;
    use serde_json::json;
    use test_log::test;

    #[test]
    fn overrides_force_full_scan() {
        let dir = tempfile::tempdir().expect("tempdir");
        let plan = choose(dir.path(), &dir.path().join("data.csv"), None, None, false, true);
        assert!(matches!(plan.strategy, Strategy::FullScan));
    }

    #[test]
    fn equality_without_index_falls_back_to_full_scan() {
        let dir = tempfile::tempdir().expect("tempdir");
        let csv_path = dir.path().join("data.csv");
        std::fs::write(&csv_path, b"id,dept\n1,Eng\n").expect("write csv");

        let condition = condition::parse(&json!({"dept": "Eng"})).expect("parse").expect("some");
        let plan = choose(dir.path(), &csv_path, Some(&condition), None, false, false);
        assert!(matches!(plan.strategy, Strategy::FullScan));
    }

    #[test]
    fn equality_with_matching_index_picks_indexed_scan() {
        let dir = tempfile::tempdir().expect("tempdir");
        let csv_path = dir.path().join("data.csv");
        std::fs::write(&csv_path, b"id,dept\n1,Eng\n").expect("write csv");
        std::fs::write(dir.path().join("data_dept.cidx"), b"").expect("touch index");

        let condition = condition::parse(&json!({"dept": "Eng"})).expect("parse").expect("some");
        let plan = choose(dir.path(), &csv_path, Some(&condition), None, false, false);
        assert!(matches!(plan.strategy, Strategy::IndexedScan { covered: true, .. }));
    }

    #[test]
    fn count_only_with_no_condition_is_count_all() {
        let dir = tempfile::tempdir().expect("tempdir");
        let plan = choose(dir.path(), &dir.path().join("data.csv"), None, None, true, false);
        assert!(matches!(plan.strategy, Strategy::CountAll));
    }
}
