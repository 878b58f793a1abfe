//! Grouping rows into duplicate groups.

use std::cmp::Ordering;

use indexmap::IndexMap;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::data::{coerce, CellValue, Row, RowId};
use crate::validation::{Severity, ValidationOutcome};

use super::options::{
    ComparisonStrategy, DuplicateGroup, DuplicateOptions, HandlingMode, Normalization,
    RetentionStrategy,
};

/// Partitions rows into duplicate groups and applies retention.
pub struct DuplicateDetector;

impl DuplicateDetector {
    /// Find duplicate groups among `rows` on `columns`.
    ///
    /// Rows whose comparison columns are all blank never form groups.
    /// Groups are ordered by their earliest member.
    pub fn detect(rows: &[Row], columns: &[String], options: &DuplicateOptions) -> Vec<DuplicateGroup> {
        let candidates: Vec<usize> = (0..rows.len())
            .filter(|&i| columns.iter().any(|c| !rows[i].get(c).is_blank()))
            .collect();

        if candidates.len() < 2 {
            return Vec::new();
        }

        let clusters = match &options.strategy {
            ComparisonStrategy::Exact => group_by_key(&candidates, |i| {
                exact_key(&rows[i], columns, &options.normalization).join("\u{1f}")
            }),
            ComparisonStrategy::Fuzzy => group_by_key(&candidates, |i| {
                columns
                    .iter()
                    .map(|c| fuzzy_key(rows[i].get(c)))
                    .collect::<Vec<_>>()
                    .join("\u{1f}")
            }),
            ComparisonStrategy::Hash => group_by_key(&candidates, |i| {
                hash_key(&exact_key(&rows[i], columns, &options.normalization))
            }),
            ComparisonStrategy::NumericTolerance { epsilon } => {
                numeric_clusters(rows, &candidates, columns, *epsilon, options)
            }
            ComparisonStrategy::Custom(comparer) => pairwise_clusters(&candidates, |a, b| {
                comparer(&rows[candidates[a]], &rows[candidates[b]])
            }),
        };

        let groups: Vec<DuplicateGroup> = clusters
            .into_iter()
            .filter(|members| members.len() > 1)
            .map(|members| build_group(rows, &members, columns, options))
            .collect();

        debug!(
            strategy = options.strategy.label(),
            rows = rows.len(),
            groups = groups.len(),
            "Duplicate detection finished"
        );
        groups
    }

    /// Row-level outcomes for the flagged members of each group.
    pub fn outcomes_for(
        groups: &[DuplicateGroup],
        columns: &[String],
        severity: Severity,
        rule_name: &str,
        message: Option<&str>,
    ) -> Vec<(RowId, ValidationOutcome)> {
        let mut out = Vec::new();
        for group in groups {
            for id in group.flagged() {
                let text = match (message, group.retained) {
                    (Some(m), _) => m.to_string(),
                    (None, Some(kept)) => format!(
                        "Duplicate of row {kept} on [{}]",
                        columns.join(", ")
                    ),
                    (None, None) => format!(
                        "One of {} duplicate rows on [{}]",
                        group.len(),
                        columns.join(", ")
                    ),
                };
                let outcome = ValidationOutcome::invalid(severity, text)
                    .with_columns(columns.iter().cloned())
                    .with_rule(rule_name);
                out.push((id, outcome));
            }
        }
        out
    }
}

/// Comparison-column values as normalized strings.
fn exact_key(row: &Row, columns: &[String], norm: &Normalization) -> Vec<String> {
    columns
        .iter()
        .map(|c| match row.get(c) {
            CellValue::Null => String::new(),
            CellValue::Text(s) => norm.apply(s),
            other => other.to_string(),
        })
        .collect()
}

fn fuzzy_key(value: &CellValue) -> String {
    let text = value.to_string().to_lowercase();
    text.split_whitespace()
        .map(|w| w.chars().filter(|c| c.is_alphanumeric()).collect::<String>())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn hash_key(parts: &[String]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    format!("{:x}", hasher.finalize())
}

fn group_by_key<F>(candidates: &[usize], key: F) -> Vec<Vec<usize>>
where
    F: Fn(usize) -> String,
{
    let mut buckets: IndexMap<String, Vec<usize>> = IndexMap::new();
    for &i in candidates {
        buckets.entry(key(i)).or_default().push(i);
    }
    buckets.into_values().collect()
}

/// O(n²) union-find over every pair. `same` receives positions into `labels`.
fn pairwise_clusters<F>(labels: &[usize], same: F) -> Vec<Vec<usize>>
where
    F: Fn(usize, usize) -> bool,
{
    let mut sets = DisjointSet::new(labels.len());
    for a in 0..labels.len() {
        for b in (a + 1)..labels.len() {
            if sets.find(a) != sets.find(b) && same(a, b) {
                sets.union(a, b);
            }
        }
    }
    sets.clusters(labels)
}

fn numeric_clusters(
    rows: &[Row],
    candidates: &[usize],
    columns: &[String],
    epsilon: f64,
    options: &DuplicateOptions,
) -> Vec<Vec<usize>> {
    let mut numeric: Vec<(usize, Vec<f64>)> = Vec::new();
    let mut other: Vec<usize> = Vec::new();
    for &i in candidates {
        let values: Option<Vec<f64>> = columns.iter().map(|c| coerce::to_decimal(rows[i].get(c))).collect();
        match values {
            Some(v) => numeric.push((i, v)),
            None => other.push(i),
        }
    }

    let within = |a: &[f64], b: &[f64]| a.iter().zip(b).all(|(x, y)| (x - y).abs() <= epsilon);

    let indices: Vec<usize> = numeric.iter().map(|(i, _)| *i).collect();
    let mut clusters = if numeric.len() > options.window_threshold {
        // Sort on the first column and only compare neighbors whose first
        // value is within epsilon.
        let mut order: Vec<usize> = (0..numeric.len()).collect();
        order.sort_by(|&a, &b| {
            numeric[a].1[0]
                .partial_cmp(&numeric[b].1[0])
                .unwrap_or(Ordering::Equal)
        });
        let mut sets = DisjointSet::new(numeric.len());
        for (pos, &a) in order.iter().enumerate() {
            for &b in &order[pos + 1..] {
                if numeric[b].1[0] - numeric[a].1[0] > epsilon {
                    break;
                }
                if within(&numeric[a].1, &numeric[b].1) {
                    sets.union(a, b);
                }
            }
        }
        sets.clusters(&indices)
    } else {
        pairwise_clusters(&indices, |a, b| within(&numeric[a].1, &numeric[b].1))
    };

    // Non-numeric keys fall back to exact grouping.
    clusters.extend(group_by_key(&other, |i| {
        exact_key(&rows[i], columns, &options.normalization).join("\u{1f}")
    }));
    clusters.sort_by_key(|members| members.first().copied().unwrap_or(usize::MAX));
    clusters
}

fn build_group(
    rows: &[Row],
    members: &[usize],
    columns: &[String],
    options: &DuplicateOptions,
) -> DuplicateGroup {
    let member_rows: Vec<&Row> = members.iter().map(|&i| &rows[i]).collect();
    let keep = select_retained(&member_rows, &options.retention);
    let row_ids: Vec<RowId> = member_rows.iter().map(|r| r.id).collect();
    let kept_id = row_ids[keep];

    let (retained, removed) = match options.handling {
        HandlingMode::DeleteDuplicates => (
            Some(kept_id),
            row_ids.iter().copied().filter(|id| *id != kept_id).collect(),
        ),
        HandlingMode::DeleteAll => (None, row_ids.clone()),
        HandlingMode::MarkOnly => (Some(kept_id), Vec::new()),
    };

    DuplicateGroup {
        key: columns.iter().map(|c| member_rows[0].get(c).clone()).collect(),
        row_ids,
        retained,
        removed,
    }
}

/// Index of the row to keep. `rows` is non-empty and in source order.
fn select_retained(rows: &[&Row], retention: &RetentionStrategy) -> usize {
    match retention {
        RetentionStrategy::KeepFirst => 0,
        RetentionStrategy::KeepLast => rows.len() - 1,
        RetentionStrategy::KeepMostComplete => {
            let mut best = 0;
            for (i, row) in rows.iter().enumerate() {
                if row.blank_count() < rows[best].blank_count() {
                    best = i;
                }
            }
            best
        }
        RetentionStrategy::KeepExtreme { column, highest } => {
            let mut best: Option<usize> = None;
            for (i, row) in rows.iter().enumerate() {
                let value = row.get(column);
                if value.is_blank() {
                    continue;
                }
                best = match best {
                    None => Some(i),
                    Some(b) => {
                        let ord = coerce::compare_values(value, rows[b].get(column));
                        let better = if *highest { ord.is_gt() } else { ord.is_lt() };
                        Some(if better { i } else { b })
                    }
                };
            }
            best.unwrap_or(0)
        }
        RetentionStrategy::Custom(selector) => {
            let chosen = selector(rows);
            if chosen < rows.len() {
                chosen
            } else {
                warn!(chosen, size = rows.len(), "Retention selector returned an out-of-range index; keeping the first row");
                0
            }
        }
    }
}

/// Union-find over positions `0..n`.
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // Keep the smaller position as root so clusters stay in source order.
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }

    /// Clusters of `labels[pos]`, ordered by first member, members in order.
    fn clusters(&mut self, labels: &[usize]) -> Vec<Vec<usize>> {
        let mut by_root: IndexMap<usize, Vec<usize>> = IndexMap::new();
        for pos in 0..labels.len() {
            let root = self.find(pos);
            by_root.entry(root).or_default().push(labels[pos]);
        }
        let mut clusters: Vec<Vec<usize>> = by_root.into_values().collect();
        for members in &mut clusters {
            members.sort_unstable();
        }
        clusters.sort_by_key(|members| members[0]);
        clusters
    }
}
