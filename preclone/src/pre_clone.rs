use crate::gene_accumulator::GenesAndScores;
use serde::{Deserialize, Serialize};
use shardio::SortKey;
use std::borrow::Cow;
use vdj_types::{
    GeneAndScore, GeneFeature, GeneType, SequenceWithQuality, TagCount, TagTuple, VdjcAlignment,
};

/// A clonotype assembled inside one tag group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreClone {
    /// Assembler id before the file is written, dense file index afterwards.
    pub index: i64,
    /// Tag prefix of the group the pre-clone was assembled in.
    pub core_key: TagTuple,
    /// Tags of the alignments the consensus was built from.
    pub core_tag_count: TagCount,
    /// Tags of all alignments assigned to this pre-clone.
    pub full_tag_count: TagCount,
    /// One sequence per assembling feature.
    pub clonal_sequence: Vec<SequenceWithQuality>,
    pub gene_scores: GenesAndScores,
    pub number_of_reads: u64,
}

impl PreClone {
    pub fn with_index(&self, index: i64) -> Self {
        PreClone {
            index,
            ..self.clone()
        }
    }

    pub fn genes(&self, gene_type: GeneType) -> &[GeneAndScore] {
        self.gene_scores
            .get(&gene_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn best_gene(&self, gene_type: GeneType) -> Option<&GeneAndScore> {
        self.genes(gene_type).first()
    }

    /// Pre-clone made of a single alignment, or `None` if the alignment misses one of
    /// the `features`.
    pub fn from_alignment(
        index: i64,
        al: &VdjcAlignment,
        features: &[GeneFeature],
    ) -> Option<PreClone> {
        let clonal_sequence = features
            .iter()
            .map(|&f| al.feature(f).cloned())
            .collect::<Option<Vec<_>>>()?;
        let gene_scores = GeneType::VJC_REFERENCE
            .into_iter()
            .filter(|&gt| !al.hits(gt).is_empty())
            .map(|gt| {
                let mut genes: Vec<_> = al.hits(gt).iter().map(|h| h.gene_and_score()).collect();
                genes.sort();
                (gt, genes)
            })
            .collect();
        Some(PreClone {
            index,
            core_key: TagTuple::NO_TAGS,
            core_tag_count: al.tag_count().clone(),
            full_tag_count: al.tag_count().clone(),
            clonal_sequence,
            gene_scores,
            number_of_reads: al.number_of_reads(),
        })
    }
}

/// Orders alignments by clone index, then by alignment id.
pub struct CloneIdOrder;

impl SortKey<VdjcAlignment> for CloneIdOrder {
    type Key = (i64, u64);

    fn sort_key(al: &VdjcAlignment) -> Cow<'_, (i64, u64)> {
        Cow::Owned((al.clone_index(), al.alignment_id()))
    }
}

/// Orders pre-clones by index.
pub struct PreCloneOrder;

impl SortKey<PreClone> for PreCloneOrder {
    type Key = i64;

    fn sort_key(clone: &PreClone) -> Cow<'_, i64> {
        Cow::Borrowed(&clone.index)
    }
}
