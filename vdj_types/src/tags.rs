//! Barcode tags attached to alignments.
//!
//! A [`TagTuple`] is the ordered list of barcode values carried by a read (for example
//! `(CELL, UMI)`). The leading `depth` components of a tuple form the key used to group
//! alignments, the remaining components are the "suffix". A [`TagCount`] is a weighted
//! multiset of tuples, used both for single alignments and for aggregated pre-clones.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single barcode value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagValue(Vec<u8>);

impl TagValue {
    pub fn new(value: &[u8]) -> Self {
        TagValue(value.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for TagValue {
    fn from(src: &str) -> Self {
        TagValue::new(src.as_bytes())
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// Ordered tuple of barcode values.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagTuple(Vec<TagValue>);

impl TagTuple {
    /// The empty tuple.
    pub const NO_TAGS: TagTuple = TagTuple(Vec::new());

    pub fn new(values: Vec<TagValue>) -> Self {
        TagTuple(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn values(&self) -> &[TagValue] {
        &self.0
    }

    /// The first `depth` values. Panics if `depth > len`.
    pub fn prefix(&self, depth: usize) -> TagTuple {
        TagTuple(self.0[..depth].to_vec())
    }

    /// Everything after the first `depth` values. Panics if `depth > len`.
    pub fn suffix(&self, depth: usize) -> TagTuple {
        TagTuple(self.0[depth..].to_vec())
    }
}

impl<'a> FromIterator<&'a str> for TagTuple {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        TagTuple(iter.into_iter().map(TagValue::from).collect())
    }
}

impl fmt::Display for TagTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.iter().join("+"))
    }
}

/// Weighted multiset of tag tuples. Iteration order is the tuple order, so two equal
/// counts always serialize identically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagCount {
    counts: BTreeMap<TagTuple, f64>,
}

impl TagCount {
    /// A count holding a single tuple with weight 1.
    pub fn singleton(tuple: TagTuple) -> Self {
        Self::singleton_with_count(tuple, 1.0)
    }

    pub fn singleton_with_count(tuple: TagTuple, count: f64) -> Self {
        TagCount {
            counts: BTreeMap::from([(tuple, count)]),
        }
    }

    pub fn from_counts(counts: impl IntoIterator<Item = (TagTuple, f64)>) -> Self {
        let mut agg = TagCountAggregator::default();
        for (tuple, count) in counts {
            agg.add_tuple(tuple, count);
        }
        agg.build()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// The grouping key at `depth`, if all tuples share the same prefix.
    /// Returns `None` for aggregated counts spanning several keys, for empty counts and
    /// for tuples shorter than `depth`.
    pub fn as_key_prefix(&self, depth: usize) -> Option<TagTuple> {
        let mut result: Option<&[TagValue]> = None;
        for tuple in self.counts.keys() {
            if tuple.len() < depth {
                return None;
            }
            let prefix = &tuple.values()[..depth];
            match result {
                None => result = Some(prefix),
                Some(r) if r != prefix => return None,
                Some(_) => {}
            }
        }
        result.map(|p| TagTuple(p.to_vec()))
    }

    /// Count of the tuple suffixes after `depth`, weights of colliding suffixes are summed.
    pub fn key_suffixes(&self, depth: usize) -> TagCount {
        let mut agg = TagCountAggregator::default();
        for (tuple, &count) in &self.counts {
            agg.add_tuple(tuple.suffix(depth.min(tuple.len())), count);
        }
        agg.build()
    }

    pub fn tuples(&self) -> impl Iterator<Item = &TagTuple> + '_ {
        self.counts.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TagTuple, f64)> + '_ {
        self.counts.iter().map(|(t, &c)| (t, c))
    }

    /// Weight of `tuple`, zero if absent.
    pub fn get(&self, tuple: &TagTuple) -> f64 {
        self.counts.get(tuple).copied().unwrap_or(0.0)
    }

    pub fn sum(&self) -> f64 {
        self.counts.values().sum()
    }

    /// True if every tuple of `other` is present in this count.
    pub fn contains_all(&self, other: &TagCount) -> bool {
        other.tuples().all(|t| self.counts.contains_key(t))
    }
}

/// Accumulates tag counts; weights of equal tuples are summed.
#[derive(Debug, Clone, Default)]
pub struct TagCountAggregator {
    counts: BTreeMap<TagTuple, f64>,
}

impl TagCountAggregator {
    pub fn add(&mut self, count: &TagCount) {
        for (tuple, c) in count.iter() {
            *self.counts.entry(tuple.clone()).or_insert(0.0) += c;
        }
    }

    pub fn add_tuple(&mut self, tuple: TagTuple, count: f64) {
        *self.counts.entry(tuple).or_insert(0.0) += count;
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn build(self) -> TagCount {
        TagCount {
            counts: self.counts,
        }
    }
}

make_enum! {
    name: TagType,
    variants: [
        (Sample, "Sample"),
        (Cell, "Cell"),
        (Molecule, "Molecule"),
        (Technical, "Technical"),
    ],
    const_var_name: TAG_TYPES,
}

/// Description of one tag column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagInfo {
    pub name: String,
    pub tag_type: TagType,
}

/// Tag schema of an alignments container.
///
/// Tags are ordered from the coarsest level (sample) to the finest (molecule).
/// `sorting_level` is the number of leading tags the records are sorted by.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagsInfo {
    pub sorting_level: usize,
    pub tags: Vec<TagInfo>,
}

impl TagsInfo {
    pub fn new(sorting_level: usize, tags: Vec<TagInfo>) -> Self {
        TagsInfo { sorting_level, tags }
    }

    /// Number of leading tags that have to be used to group records at the
    /// `tag_type` level, or `None` if no tag of that level (or coarser) exists.
    pub fn depth_for(&self, tag_type: TagType) -> Option<usize> {
        self.tags
            .iter()
            .rposition(|t| t.tag_type <= tag_type)
            .map(|i| i + 1)
    }

    pub fn with_sorting_level(&self, sorting_level: usize) -> Self {
        TagsInfo {
            sorting_level,
            tags: self.tags.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TagInfo> + '_ {
        self.tags.iter()
    }
}
