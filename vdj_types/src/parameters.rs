use crate::GeneType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Source of per-gene-type relative minimal scores used to filter gene hits.
pub trait HasRelativeMinScore {
    /// Hits scoring below `relative_min_score * best score` are ignored.
    /// `None` means gene assignment is not computed for this gene type.
    fn relative_min_score(&self, gene_type: GeneType) -> Option<f32>;
}

/// Parameters of the upstream aligner, carried through file headers untouched
/// except for the relative minimal scores that drive gene aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignerParameters {
    pub relative_min_scores: BTreeMap<GeneType, f32>,
    pub save_original_reads: bool,
    pub min_sum_score: f32,
}

impl Default for AlignerParameters {
    fn default() -> Self {
        AlignerParameters {
            relative_min_scores: GeneType::VJC_REFERENCE
                .into_iter()
                .map(|gt| (gt, 0.8))
                .collect(),
            save_original_reads: false,
            min_sum_score: 120.0,
        }
    }
}

impl HasRelativeMinScore for AlignerParameters {
    fn relative_min_score(&self, gene_type: GeneType) -> Option<f32> {
        self.relative_min_scores.get(&gene_type).copied()
    }
}

impl HasRelativeMinScore for BTreeMap<GeneType, f32> {
    fn relative_min_score(&self, gene_type: GeneType) -> Option<f32> {
        self.get(&gene_type).copied()
    }
}
