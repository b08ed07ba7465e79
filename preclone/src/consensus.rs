//! Consensus building inside one alignment group.

use crate::parameters::ConsensusParameters;
use bit_set::BitSet;
use fxhash::FxHashMap;
use std::sync::Arc;
use vdj_types::SequenceWithQuality;

/// One consensus: the input rows it was built from and one sequence per assembling
/// feature.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsensusResult {
    pub records_used: BitSet,
    pub sequences: Vec<SequenceWithQuality>,
}

/// Builds consensuses from rows of assembling feature sequences, all rows coming from
/// the same group.
pub trait ConsensusAssembler {
    fn compute_consensuses(&self, rows: &[Vec<SequenceWithQuality>]) -> Vec<ConsensusResult>;
}

impl<T: ConsensusAssembler + ?Sized> ConsensusAssembler for Arc<T> {
    fn compute_consensuses(&self, rows: &[Vec<SequenceWithQuality>]) -> Vec<ConsensusResult> {
        (**self).compute_consensuses(rows)
    }
}

/// Merges rows with identical sequences. Consensus quality is the best quality observed
/// at each position, capped at `max_quality`.
pub struct ExactConsensusAssembler {
    params: ConsensusParameters,
}

impl ExactConsensusAssembler {
    pub fn new(params: ConsensusParameters) -> Self {
        ExactConsensusAssembler { params }
    }
}

impl ConsensusAssembler for ExactConsensusAssembler {
    fn compute_consensuses(&self, rows: &[Vec<SequenceWithQuality>]) -> Vec<ConsensusResult> {
        let mut cluster_of: FxHashMap<Vec<&[u8]>, usize> = FxHashMap::default();
        let mut clusters: Vec<Vec<usize>> = Vec::new();
        for (i, row) in rows.iter().enumerate() {
            let key: Vec<&[u8]> = row.iter().map(SequenceWithQuality::sequence).collect();
            let c = *cluster_of.entry(key).or_insert_with(|| {
                clusters.push(Vec::new());
                clusters.len() - 1
            });
            clusters[c].push(i);
        }

        // Largest first, ties in order of first appearance
        clusters.sort_by_key(|members| (std::cmp::Reverse(members.len()), members[0]));

        let min_records = (self.params.min_records_per_consensus as f64)
            .max(self.params.min_record_share_per_consensus * rows.len() as f64);
        let mut result: Vec<ConsensusResult> = clusters
            .into_iter()
            .filter(|members| members.len() as f64 >= min_records)
            .map(|members| self.merge(rows, &members))
            .collect();
        if self.params.max_consensuses > 0 {
            result.truncate(self.params.max_consensuses);
        }
        result
    }
}

impl ExactConsensusAssembler {
    fn merge(&self, rows: &[Vec<SequenceWithQuality>], members: &[usize]) -> ConsensusResult {
        let first = &rows[members[0]];
        let sequences = (0..first.len())
            .map(|f| {
                let mut quality = vec![0u8; first[f].len()];
                for &m in members {
                    for (q, &mq) in quality.iter_mut().zip(rows[m][f].quality()) {
                        *q = (*q).max(mq);
                    }
                }
                for q in &mut quality {
                    *q = (*q).min(self.params.max_quality);
                }
                SequenceWithQuality::new(first[f].sequence(), &quality)
            })
            .collect();
        ConsensusResult {
            records_used: members.iter().copied().collect(),
            sequences,
        }
    }
}
