use fxhash::FxHashMap;
use std::collections::BTreeMap;
use vdj_types::{GeneAndScore, GeneId, GeneType, HasRelativeMinScore};

/// Gene hits of one alignment, per gene type.
pub type GenesAndScores = BTreeMap<GeneType, Vec<GeneAndScore>>;

/// Sums gene scores over the alignments of one pre-clone.
#[derive(Debug, Default)]
pub struct GeneAccumulator {
    // number of accumulated alignments having at least one hit, per gene type
    observations: [u32; 4],
    scores: [FxHashMap<GeneId, f32>; 4],
}

impl GeneAccumulator {
    pub fn accumulate(&mut self, genes: &GenesAndScores) {
        for gt in GeneType::VJC_REFERENCE {
            let hits = match genes.get(&gt) {
                Some(hits) if !hits.is_empty() => hits,
                _ => continue,
            };
            self.observations[gt.index()] += 1;
            let scores = &mut self.scores[gt.index()];
            for gs in hits {
                *scores.entry(gs.gene.clone()).or_insert(0.0) += gs.score;
            }
        }
    }

    /// Genes whose summed score exceeds `relative_min_score * best summed score`, with
    /// the score averaged over observations and rounded to one decimal. Best first.
    /// Gene types without a relative minimal score or without hits are absent.
    pub fn aggregate(&self, min_scores: &impl HasRelativeMinScore) -> GenesAndScores {
        let mut result = GenesAndScores::new();
        for gt in GeneType::VJC_REFERENCE {
            let Some(relative_min_score) = min_scores.relative_min_score(gt) else {
                continue;
            };
            let scores = &self.scores[gt.index()];
            if scores.is_empty() {
                continue;
            }
            let threshold = scores.values().copied().fold(0.0f32, f32::max) * relative_min_score;
            let observations = self.observations[gt.index()] as f32;
            let mut genes: Vec<GeneAndScore> = scores
                .iter()
                .filter(|(_, score)| **score > threshold)
                .map(|(gene, &score)| {
                    GeneAndScore::new(gene.clone(), (score * 10.0 / observations).round() / 10.0)
                })
                .collect();
            genes.sort();
            result.insert(gt, genes);
        }
        result
    }
}
