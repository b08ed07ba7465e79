//! Aligned read records.

use crate::{GeneAndScore, GeneFeature, GeneId, GeneType, SequenceWithQuality, TagCount};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One gene hit of an alignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VdjcHit {
    pub gene: GeneId,
    pub score: f32,
}

impl VdjcHit {
    pub fn new(gene: impl Into<String>, score: f32) -> Self {
        VdjcHit {
            gene: GeneId::new(gene),
            score,
        }
    }

    pub fn gene_and_score(&self) -> GeneAndScore {
        GeneAndScore::new(self.gene.clone(), self.score)
    }
}

/// Clone index of alignments not assigned to any pre-clone.
pub const UNASSIGNED: i64 = -1;

/// An alignment of one read (or read group) against the V, D, J and C references.
///
/// Records are immutable. Clone assignment produces a modified copy, see
/// [`VdjcAlignment::with_clone_index`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VdjcAlignment {
    alignment_id: u64,
    min_read_id: u64,
    number_of_reads: u64,
    /// Ranked hits, indexed by [`GeneType::index`].
    hits: [Vec<VdjcHit>; 4],
    features: BTreeMap<GeneFeature, SequenceWithQuality>,
    tag_count: TagCount,
    clone_index: i64,
    mapping_type: u8,
}

impl VdjcAlignment {
    pub fn new(alignment_id: u64, tag_count: TagCount) -> Self {
        VdjcAlignment {
            alignment_id,
            min_read_id: alignment_id,
            number_of_reads: 1,
            hits: Default::default(),
            features: BTreeMap::new(),
            tag_count,
            clone_index: UNASSIGNED,
            mapping_type: 0,
        }
    }

    /// Builder: set the ranked hits of one gene type, best hit first.
    pub fn hits_for(mut self, gene_type: GeneType, hits: Vec<VdjcHit>) -> Self {
        self.hits[gene_type.index()] = hits;
        self
    }

    /// Builder: attach an extracted feature sequence.
    pub fn feature_sequence(mut self, feature: GeneFeature, seq: SequenceWithQuality) -> Self {
        self.features.insert(feature, seq);
        self
    }

    /// Builder: set the number of reads and the minimal read id.
    pub fn reads(mut self, min_read_id: u64, number_of_reads: u64) -> Self {
        self.min_read_id = min_read_id;
        self.number_of_reads = number_of_reads;
        self
    }

    pub fn alignment_id(&self) -> u64 {
        self.alignment_id
    }

    pub fn min_read_id(&self) -> u64 {
        self.min_read_id
    }

    pub fn number_of_reads(&self) -> u64 {
        self.number_of_reads
    }

    pub fn hits(&self, gene_type: GeneType) -> &[VdjcHit] {
        &self.hits[gene_type.index()]
    }

    pub fn best_hit(&self, gene_type: GeneType) -> Option<&VdjcHit> {
        self.hits[gene_type.index()].first()
    }

    /// Extracted sequence of `feature`, or `None` if the alignment does not cover it.
    pub fn feature(&self, feature: GeneFeature) -> Option<&SequenceWithQuality> {
        self.features.get(&feature)
    }

    pub fn tag_count(&self) -> &TagCount {
        &self.tag_count
    }

    pub fn clone_index(&self) -> i64 {
        self.clone_index
    }

    pub fn mapping_type(&self) -> u8 {
        self.mapping_type
    }

    pub fn is_assigned(&self) -> bool {
        self.clone_index != UNASSIGNED
    }

    pub fn with_clone_index(&self, clone_index: i64) -> Self {
        VdjcAlignment {
            clone_index,
            ..self.clone()
        }
    }

    pub fn with_clone_index_and_mapping_type(&self, clone_index: i64, mapping_type: u8) -> Self {
        VdjcAlignment {
            clone_index,
            mapping_type,
            ..self.clone()
        }
    }
}
