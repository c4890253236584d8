//! Duplicate grouping by exact key equality.
//!
//! Grouping runs either over the whole store (the database clusters equal
//! values) or within caller-supplied partitions, typically the output of a
//! coarser pass. Chaining size → quick hash → full hash narrows candidates
//! at each step without ever comparing across partitions.
//!
//! User-declared known differences always win over hash equality.

pub mod similarity;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::media::{FileEntry, FileId};
use crate::pipeline::hash::Digest;
use crate::store::MetadataStore;

/// Comparison key for exact grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKey {
    Size,
    QuickHash,
    FullHash,
}

/// A comparable key value. Absent values never compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyValue {
    Size(u64),
    Digest(Digest),
}

impl GroupKey {
    /// The funnel order, cheapest first.
    pub const FUNNEL: [GroupKey; 3] = [GroupKey::Size, GroupKey::QuickHash, GroupKey::FullHash];

    /// Backing column in the `files` table.
    pub(crate) fn column(self) -> &'static str {
        match self {
            GroupKey::Size => "size",
            GroupKey::QuickHash => "qhash",
            GroupKey::FullHash => "hash",
        }
    }

    pub fn value(self, entry: &FileEntry) -> Option<KeyValue> {
        match self {
            GroupKey::Size => entry.size.map(KeyValue::Size),
            GroupKey::QuickHash => Some(KeyValue::Digest(entry.quick_hash)),
            GroupKey::FullHash => entry.full_hash.map(KeyValue::Digest),
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GroupKey::Size => "size",
            GroupKey::QuickHash => "quick_hash",
            GroupKey::FullHash => "full_hash",
        })
    }
}

impl FromStr for GroupKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "size" => Ok(GroupKey::Size),
            "quick_hash" | "qhash" | "quick" => Ok(GroupKey::QuickHash),
            "full_hash" | "hash" | "full" => Ok(GroupKey::FullHash),
            other => Err(format!("unknown group key: {other}")),
        }
    }
}

/// Set of unordered file-id pairs declared distinct, indexed by member.
#[derive(Debug, Clone, Default)]
pub struct KnownDifferences {
    partners: HashMap<FileId, HashSet<FileId>>,
    len: usize,
}

impl KnownDifferences {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the pair was already present.
    pub fn insert(&mut self, a: FileId, b: FileId) -> bool {
        let added = self.partners.entry(a).or_default().insert(b);
        self.partners.entry(b).or_default().insert(a);
        if added {
            self.len += 1;
        }
        added
    }

    pub fn contains(&self, a: FileId, b: FileId) -> bool {
        self.partners.get(&a).is_some_and(|p| p.contains(&b))
    }

    /// Every file declared different from `id`.
    pub fn partners(&self, id: FileId) -> impl Iterator<Item = FileId> + '_ {
        self.partners.get(&id).into_iter().flatten().copied()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Pairs as `(smaller, larger)`, in ascending order.
    pub fn sorted_pairs(&self) -> Vec<(FileId, FileId)> {
        let mut pairs: Vec<_> = self
            .partners
            .iter()
            .flat_map(|(&a, others)| others.iter().filter(move |&&b| a < b).map(move |&b| (a, b)))
            .collect();
        pairs.sort();
        pairs
    }
}

impl FromIterator<(FileId, FileId)> for KnownDifferences {
    fn from_iter<I: IntoIterator<Item = (FileId, FileId)>>(iter: I) -> Self {
        let mut known = Self::new();
        for (a, b) in iter {
            known.insert(a, b);
        }
        known
    }
}

/// Two or more files that matched under one key. Members are ordered by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub members: Vec<FileEntry>,
}

impl DuplicateGroup {
    pub fn new(mut members: Vec<FileEntry>) -> Self {
        members.sort_by_key(|m| m.id);
        Self { members }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn ids(&self) -> Vec<FileId> {
        self.members.iter().map(|m| m.id).collect()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|m| m.path.as_str())
    }

    /// Bytes that could be reclaimed by keeping one member.
    pub fn redundant_bytes(&self) -> u64 {
        let sizes: Vec<u64> = self.members.iter().filter_map(|m| m.size).collect();
        sizes.iter().sum::<u64>() - sizes.iter().max().copied().unwrap_or(0)
    }
}

/// Remove members that conflict with known differences.
///
/// Repeatedly drops the member involved in the most remaining conflicts
/// (the larger id on ties) until no declared pair is left. Returns `None`
/// when fewer than two members survive.
pub fn apply_known_differences(
    mut members: Vec<FileEntry>,
    known: &KnownDifferences,
) -> Option<Vec<FileEntry>> {
    if !known.is_empty() {
        let present: HashSet<FileId> = members.iter().map(|m| m.id).collect();
        let mut conflicts: HashMap<FileId, HashSet<FileId>> = HashMap::new();
        for member in &members {
            let inside: HashSet<FileId> = known
                .partners(member.id)
                .filter(|other| *other != member.id && present.contains(other))
                .collect();
            if !inside.is_empty() {
                conflicts.insert(member.id, inside);
            }
        }

        let mut removed = HashSet::new();
        loop {
            let Some((_, worst)) = conflicts.iter().map(|(id, p)| (p.len(), *id)).max() else {
                break;
            };
            tracing::debug!("Known difference removes file {} from a group", worst);
            for partner in conflicts.remove(&worst).unwrap_or_default() {
                if let Some(remaining) = conflicts.get_mut(&partner) {
                    remaining.remove(&worst);
                    if remaining.is_empty() {
                        conflicts.remove(&partner);
                    }
                }
            }
            removed.insert(worst);
        }
        if !removed.is_empty() {
            members.retain(|m| !removed.contains(&m.id));
        }
    }
    (members.len() >= 2).then_some(members)
}

/// Group within each partition by equality of `key`. Pure; does not touch
/// the store.
pub fn group_partitions(
    key: GroupKey,
    partitions: &[DuplicateGroup],
    known: &KnownDifferences,
) -> Vec<DuplicateGroup> {
    let mut groups = Vec::new();
    for partition in partitions {
        let mut buckets: HashMap<KeyValue, Vec<FileEntry>> = HashMap::new();
        for member in &partition.members {
            if let Some(value) = key.value(member) {
                buckets.entry(value).or_default().push(member.clone());
            }
        }
        groups.extend(
            buckets
                .into_values()
                .filter(|bucket| bucket.len() >= 2)
                .filter_map(|bucket| apply_known_differences(bucket, known))
                .map(DuplicateGroup::new),
        );
    }
    sort_groups(&mut groups);
    groups
}

fn sort_groups(groups: &mut [DuplicateGroup]) {
    groups.sort_by_key(|g| g.members.first().map(|m| m.id));
}

/// Group stored files by `key`.
///
/// Without partitions the whole store is grouped. With partitions, each
/// partition's members are re-read from the store (so hashes computed since
/// the previous pass are seen; removed files drop out) and grouped only
/// among themselves.
pub fn group(
    store: &MetadataStore,
    key: GroupKey,
    partitions: Option<&[DuplicateGroup]>,
) -> StoreResult<Vec<DuplicateGroup>> {
    let known = store.known_differences()?;
    let groups = match partitions {
        None => {
            let mut groups: Vec<DuplicateGroup> = store
                .duplicate_entries(key)?
                .into_iter()
                .filter_map(|cluster| apply_known_differences(cluster, &known))
                .map(DuplicateGroup::new)
                .collect();
            sort_groups(&mut groups);
            groups
        }
        Some(partitions) => {
            let mut refreshed = Vec::with_capacity(partitions.len());
            for partition in partitions {
                refreshed.push(DuplicateGroup::new(store.entries_by_ids(&partition.ids())?));
            }
            group_partitions(key, &refreshed, &known)
        }
    };
    tracing::debug!("Grouped by {}: {} groups", key, groups.len());
    Ok(groups)
}

/// Run successive passes, each refining the previous one's output.
pub fn funnel(store: &MetadataStore, keys: &[GroupKey]) -> StoreResult<Vec<DuplicateGroup>> {
    let mut current: Option<Vec<DuplicateGroup>> = None;
    for &key in keys {
        let next = group(store, key, current.as_deref())?;
        current = Some(next);
    }
    Ok(current.unwrap_or_default())
}
