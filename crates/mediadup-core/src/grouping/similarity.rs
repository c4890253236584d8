//! Perceptual near-duplicate detection.
//!
//! Unlike exact grouping, signatures are compared by distance: two items
//! whose mean absolute difference (on the 0–255 channel scale) is within a
//! threshold are linked, and linked items form a group (connected
//! components). Known differences still apply to the resulting groups.

use crate::media::{ColorCurve, FileEntry, Signature};

use super::{apply_known_differences, sort_groups, DuplicateGroup, KnownDifferences};

/// Stored signatures are channel means scaled by 256.
const SIGNATURE_SCALE: f64 = 256.0;

/// Mean absolute per-cell difference on the 0–255 scale. `None` when the
/// grids have different shapes.
pub fn signature_distance(a: &Signature, b: &Signature) -> Option<f64> {
    if a.rows() != b.rows() || a.cols() != b.cols() || a.values().is_empty() {
        return None;
    }
    let total: u64 = a
        .values()
        .iter()
        .zip(b.values())
        .map(|(&x, &y)| u64::from(x.abs_diff(y)))
        .sum();
    Some(total as f64 / a.values().len() as f64 / SIGNATURE_SCALE)
}

/// Mean absolute difference over the common prefix of two curves. `None`
/// when either curve is empty.
pub fn curve_distance(a: &ColorCurve, b: &ColorCurve) -> Option<f64> {
    let len = a.len().min(b.len());
    if len == 0 {
        return None;
    }
    let total: u64 = a.entries()[..len]
        .iter()
        .zip(&b.entries()[..len])
        .flat_map(|(x, y)| x.iter().zip(y).map(|(&p, &q)| u64::from(p.abs_diff(q))))
        .sum();
    Some(total as f64 / (len * 3) as f64)
}

fn signature_mean(signature: &Signature) -> f64 {
    let values = signature.values();
    let sum: u64 = values.iter().map(|&v| u64::from(v)).sum();
    sum as f64 / values.len().max(1) as f64 / SIGNATURE_SCALE
}

/// Images whose signatures are within `threshold` of each other.
///
/// All-zero signatures are skipped: they are indistinguishable from decode
/// failures.
pub fn similar_images(
    items: Vec<(FileEntry, Signature)>,
    threshold: f64,
    known: &KnownDifferences,
) -> Vec<DuplicateGroup> {
    let mut items: Vec<(f64, FileEntry, Signature)> = items
        .into_iter()
        .filter(|(entry, signature)| {
            let blank = signature.is_all_zero();
            if blank {
                tracing::debug!("Skipping blank signature of {}", entry.path);
            }
            !blank
        })
        .map(|(entry, signature)| (signature_mean(&signature), entry, signature))
        .collect();
    // The distance is bounded below by the gap between means, so once the
    // sorted means differ by more than the threshold no later pair can match.
    items.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut links = UnionFind::new(items.len());
    for i in 0..items.len() {
        for j in i + 1..items.len() {
            if items[j].0 - items[i].0 > threshold {
                break;
            }
            if signature_distance(&items[i].2, &items[j].2).is_some_and(|d| d <= threshold) {
                links.union(i, j);
            }
        }
    }
    components(links, items.into_iter().map(|(_, entry, _)| entry), known)
}

/// Videos whose durations differ by at most `duration_tolerance` seconds
/// and whose color curves are within `threshold`.
pub fn similar_videos(
    items: Vec<(FileEntry, u64, ColorCurve)>,
    threshold: f64,
    duration_tolerance: u64,
    known: &KnownDifferences,
) -> Vec<DuplicateGroup> {
    let mut items: Vec<_> = items
        .into_iter()
        .filter(|(_, _, curve)| !curve.is_empty())
        .collect();
    items.sort_by_key(|(_, duration, _)| *duration);

    let mut links = UnionFind::new(items.len());
    for i in 0..items.len() {
        for j in i + 1..items.len() {
            if items[j].1 - items[i].1 > duration_tolerance {
                break;
            }
            if curve_distance(&items[i].2, &items[j].2).is_some_and(|d| d <= threshold) {
                links.union(i, j);
            }
        }
    }
    components(links, items.into_iter().map(|(entry, _, _)| entry), known)
}

fn components(
    mut links: UnionFind,
    entries: impl Iterator<Item = FileEntry>,
    known: &KnownDifferences,
) -> Vec<DuplicateGroup> {
    let mut by_root: std::collections::HashMap<usize, Vec<FileEntry>> = Default::default();
    for (i, entry) in entries.enumerate() {
        by_root.entry(links.find(i)).or_default().push(entry);
    }
    let mut groups: Vec<DuplicateGroup> = by_root
        .into_values()
        .filter(|members| members.len() >= 2)
        .filter_map(|members| apply_known_differences(members, known))
        .map(DuplicateGroup::new)
        .collect();
    sort_groups(&mut groups);
    groups
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[rb] = ra;
        }
    }
}
