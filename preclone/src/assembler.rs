//! Assembly of pre-clones inside tag groups.
//!
//! Every group is read twice, from two independent cursors over the same alignments:
//!
//! 1. the first pass extracts the assembling features and builds consensuses from the
//!    alignments covering all of them (the "core" alignments);
//! 2. genes and tag suffixes unambiguously linked to a single consensus are collected;
//! 3. the second pass attaches the alignments without assembling features to a consensus
//!    when all their gene and tag suffix signals point to it.

use crate::consensus::{ConsensusAssembler, ExactConsensusAssembler};
use crate::errors::PreCloneError;
use crate::gene_accumulator::{GeneAccumulator, GenesAndScores};
use crate::grouping::{AlignmentGroup, AlignmentGroups};
use crate::parameters::PreCloneAssemblerParameters;
use crate::pre_clone::PreClone;
use crate::report::PreCloneAssemblerReport;
use anyhow::{bail, Result};
use fxhash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::Hash;
use vdj_types::{
    GeneFeature, GeneId, GeneType, HasRelativeMinScore, SequenceWithQuality, TagCount,
    TagCountAggregator, TagTuple, VdjcAlignment,
};

/// Mapping value of alignments without assembling features, before empirical assignment.
const NO_FEATURE: i32 = 0;
/// Mapping and index value of discarded alignments and ambiguous signals.
const AMBIGUOUS: i32 = -1;

/// Notified about alignments missing one of the assembling features.
pub trait ClonalSequenceExtractionListener {
    fn on_failed_to_extract(&mut self, al: &VdjcAlignment);
}

/// Pre-clones of one group and the assignment of the group alignments to them.
#[derive(Debug, Clone, PartialEq)]
pub struct PreCloneAssemblerResult {
    pub clones: Vec<PreClone>,
    group_key: TagTuple,
    group_size: usize,
    // pre-clone id per group-local alignment index, -1 if unassigned
    mapping: Option<Vec<i64>>,
}

impl PreCloneAssemblerResult {
    pub fn group_key(&self) -> &TagTuple {
        &self.group_key
    }

    /// Number of alignments in the group.
    pub fn group_size(&self) -> usize {
        self.group_size
    }

    /// Id of the pre-clone the `local_idx`-th alignment of the group was assigned to,
    /// or -1.
    pub fn clone_for_alignment(&self, local_idx: usize) -> i64 {
        match &self.mapping {
            Some(mapping) => mapping[local_idx],
            None => -1,
        }
    }
}

/// Core alignment of the group under assembly.
struct AlignmentInfo {
    local_idx: usize,
    suffix_count: TagCount,
    genes: GenesAndScores,
}

/// Consensus surviving the tag suffix filter.
struct Candidate {
    sequences: Vec<SequenceWithQuality>,
    // indices into the group AlignmentInfo list
    records: Vec<usize>,
}

/// Links from genes and tag suffixes to candidates, as candidate index + 1 or
/// [`AMBIGUOUS`].
#[derive(Default)]
struct SignalIndex {
    suffixes: FxHashMap<TagTuple, i32>,
    genes: FxHashMap<GeneId, i32>,
    gene_and_suffix: FxHashMap<(GeneId, TagTuple), i32>,
}

/// Link `key` to `candidate`. Returns true if the key was already linked to another
/// candidate, in which case it becomes ambiguous.
fn claim<K: Hash + Eq>(map: &mut FxHashMap<K, i32>, key: K, candidate: i32) -> bool {
    let value = map.entry(key).or_insert(NO_FEATURE);
    if *value == NO_FEATURE {
        *value = candidate;
        false
    } else if *value > 0 && *value != candidate {
        *value = AMBIGUOUS;
        true
    } else {
        false
    }
}

/// Fold one empirical signal into `current`. Returns true if this signal made the
/// first assignment.
fn offer(current: &mut i32, signal: Option<&i32>) -> bool {
    let signal = match signal {
        Some(&s) if s > 0 => s,
        _ => return false,
    };
    if *current == NO_FEATURE {
        *current = signal;
        true
    } else {
        if *current != signal {
            *current = AMBIGUOUS;
        }
        false
    }
}

pub struct PreCloneAssembler<I1, I2> {
    parameters: PreCloneAssemblerParameters,
    assembling_features: Vec<GeneFeature>,
    depth: usize,
    relative_min_scores: BTreeMap<GeneType, f32>,
    groups1: AlignmentGroups<I1>,
    groups2: AlignmentGroups<I2>,
    consensus_assembler: Box<dyn ConsensusAssembler + Send>,
    extraction_listener: Option<Box<dyn ClonalSequenceExtractionListener + Send>>,
    next_clone_id: i64,
    report: PreCloneAssemblerReport,
}

impl<I1, I2> PreCloneAssembler<I1, I2>
where
    I1: Iterator<Item = Result<VdjcAlignment>>,
    I2: Iterator<Item = Result<VdjcAlignment>>,
{
    /// `channel1` and `channel2` must yield the same alignments, sorted by tags at least
    /// down to `depth`.
    pub fn new(
        parameters: PreCloneAssemblerParameters,
        assembling_features: &[GeneFeature],
        depth: usize,
        channel1: I1,
        channel2: I2,
        relative_min_scores: &impl HasRelativeMinScore,
    ) -> Self {
        let consensus_assembler =
            Box::new(ExactConsensusAssembler::new(parameters.consensus.clone()));
        PreCloneAssembler {
            parameters,
            assembling_features: assembling_features.to_vec(),
            depth,
            relative_min_scores: GeneType::VJC_REFERENCE
                .into_iter()
                .filter_map(|gt| relative_min_scores.relative_min_score(gt).map(|s| (gt, s)))
                .collect(),
            groups1: AlignmentGroups::new(channel1, depth),
            groups2: AlignmentGroups::new(channel2, depth),
            consensus_assembler,
            extraction_listener: None,
            next_clone_id: 0,
            report: PreCloneAssemblerReport::default(),
        }
    }

    pub fn with_consensus_assembler(
        mut self,
        consensus_assembler: impl ConsensusAssembler + Send + 'static,
    ) -> Self {
        self.consensus_assembler = Box::new(consensus_assembler);
        self
    }

    pub fn set_extraction_listener(
        &mut self,
        listener: impl ClonalSequenceExtractionListener + Send + 'static,
    ) -> Result<()> {
        if self.extraction_listener.is_some() {
            bail!("extraction listener is already set");
        }
        self.extraction_listener = Some(Box::new(listener));
        Ok(())
    }

    pub fn parameters(&self) -> &PreCloneAssemblerParameters {
        &self.parameters
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn report(&self) -> &PreCloneAssemblerReport {
        &self.report
    }

    pub fn into_report(self) -> PreCloneAssemblerReport {
        self.report
    }

    // Pull the next group of the second channel, it must match the group of the first.
    fn replay_group(&mut self, key: &TagTuple, size: usize) -> Result<AlignmentGroup> {
        let Some(group) = self.groups2.next().transpose()? else {
            return Err(PreCloneError::DesynchronizedGroups(format!(
                "second pass ended before group {key}"
            ))
            .into());
        };
        if &group.key != key || group.alignments.len() != size {
            return Err(PreCloneError::DesynchronizedGroups(format!(
                "expected group {key} of {size} alignments, got group {} of {} alignments",
                group.key,
                group.alignments.len()
            ))
            .into());
        }
        Ok(group)
    }

    /// Assemble the next group, `None` once both channels are exhausted.
    pub fn next_group(&mut self) -> Result<Option<PreCloneAssemblerResult>> {
        let Some(group) = self.groups1.next().transpose()? else {
            return Ok(None);
        };
        self.report.input_groups += 1;
        let group_size = group.alignments.len();

        // Feature pass
        let mut rows: Vec<Vec<SequenceWithQuality>> = Vec::new();
        let mut infos: Vec<AlignmentInfo> = Vec::new();
        let mut total_suffix_agg =
            (self.parameters.min_tag_suffix_share > 0.0).then(TagCountAggregator::default);

        for (local_idx, al) in group.alignments.iter().enumerate() {
            let row: Option<Vec<SequenceWithQuality>> = self
                .assembling_features
                .iter()
                .map(|&f| al.feature(f).cloned())
                .collect();
            let Some(row) = row else {
                if let Some(listener) = self.extraction_listener.as_mut() {
                    listener.on_failed_to_extract(al);
                }
                continue;
            };
            rows.push(row);

            let genes: GenesAndScores = GeneType::VJC_REFERENCE
                .into_iter()
                .map(|gt| (gt, al.hits(gt).iter().map(|h| h.gene_and_score()).collect()))
                .collect();
            let suffix_count = al.tag_count().key_suffixes(self.depth);
            if let Some(agg) = total_suffix_agg.as_mut() {
                agg.add(&suffix_count);
            }
            infos.push(AlignmentInfo {
                local_idx,
                suffix_count,
                genes,
            });
        }

        self.report.input_assembling_feature_sequences += infos.len() as u64;
        self.report.input_alignments += group_size as u64;

        if rows.is_empty() {
            self.replay_group(&group.key, group_size)?;
            self.report.groups_with_no_assembling_feature += 1;
            return Ok(Some(PreCloneAssemblerResult {
                clones: Vec::new(),
                group_key: group.key,
                group_size,
                mapping: None,
            }));
        }

        // Consensus pass
        let consensuses = self.consensus_assembler.compute_consensuses(&rows);

        // NO_FEATURE, AMBIGUOUS or candidate index + 1, per group-local index
        let mut mapping = vec![NO_FEATURE; group_size];

        // Tag suffix decontamination
        let total_suffix_count = total_suffix_agg.map(TagCountAggregator::build);
        let mut candidates: Vec<Candidate> = Vec::with_capacity(consensuses.len());
        for consensus in consensuses {
            let mut suffix_agg = TagCountAggregator::default();
            for r in consensus.records_used.iter() {
                suffix_agg.add(&infos[r].suffix_count);
            }
            let mut suffix_count = suffix_agg.build();

            if let Some(total) = &total_suffix_count {
                let share = self.parameters.min_tag_suffix_share;
                let filtered = TagCount::from_counts(
                    suffix_count
                        .iter()
                        .filter(|&(tuple, count)| count >= share * total.get(tuple))
                        .map(|(tuple, count)| (tuple.clone(), count)),
                );
                if filtered.is_empty() {
                    self.report.core_clonotypes_dropped_by_tag_suffix += 1;
                    self.report.core_alignments_dropped_by_tag_suffix +=
                        consensus.records_used.len() as u64;
                    continue;
                }
                suffix_count = filtered;
            }

            let mut records = Vec::with_capacity(consensus.records_used.len());
            for r in consensus.records_used.iter() {
                if total_suffix_count.is_none()
                    || suffix_count.contains_all(&infos[r].suffix_count)
                {
                    records.push(r);
                } else {
                    mapping[infos[r].local_idx] = AMBIGUOUS;
                }
            }
            candidates.push(Candidate {
                sequences: consensus.sequences,
                records,
            });
        }

        let number_of_clones = candidates.iter().filter(|c| !c.records.is_empty()).count();
        self.report.clonotypes += number_of_clones as u64;
        *self
            .report
            .clonotypes_per_group
            .entry(number_of_clones)
            .or_insert(0) += 1;
        if number_of_clones == 0 {
            self.report.assembling_feature_sequences_in_zero_pre_clones += infos.len() as u64;
        }

        // Per-candidate aggregation
        let mut index = SignalIndex::default();
        let mut gene_infos: Vec<GenesAndScores> = Vec::with_capacity(candidates.len());
        for (c_idx, candidate) in candidates.iter().enumerate() {
            let cp1 = c_idx as i32 + 1;
            let mut acc = GeneAccumulator::default();
            let mut suffixes: BTreeSet<&TagTuple> = BTreeSet::new();
            for &r in &candidate.records {
                let info = &infos[r];
                acc.accumulate(&info.genes);
                suffixes.extend(info.suffix_count.tuples());
                mapping[info.local_idx] = cp1;
                self.report.core_alignments += 1;
            }
            let genes = acc.aggregate(&self.relative_min_scores);

            for &suffix in &suffixes {
                if claim(&mut index.suffixes, suffix.clone(), cp1) {
                    self.report.umi_conflicts += 1;
                }
            }
            for gt in GeneType::VJ_REFERENCE {
                let Some(gene_list) = genes.get(&gt) else {
                    continue;
                };
                for gs in gene_list {
                    if claim(&mut index.genes, gs.gene.clone(), cp1) {
                        *self.report.gene_conflicts.entry(gt).or_insert(0) += 1;
                    }
                    for &suffix in &suffixes {
                        let key = (gs.gene.clone(), suffix.clone());
                        if claim(&mut index.gene_and_suffix, key, cp1) {
                            self.report.gat_conflicts += 1;
                        }
                    }
                }
            }
            gene_infos.push(genes);
        }

        // Core alignments left out of every consensus make their signals ambiguous
        for info in &infos {
            if mapping[info.local_idx] > 0 {
                continue;
            }
            mapping[info.local_idx] = AMBIGUOUS;
            self.report.discarded_core_alignments += 1;

            for suffix in info.suffix_count.tuples() {
                index.suffixes.insert(suffix.clone(), AMBIGUOUS);
            }
            for gt in GeneType::VJ_REFERENCE {
                for gs in info.genes.get(&gt).into_iter().flatten() {
                    index.genes.insert(gs.gene.clone(), AMBIGUOUS);
                    for suffix in info.suffix_count.tuples() {
                        index
                            .gene_and_suffix
                            .insert((gs.gene.clone(), suffix.clone()), AMBIGUOUS);
                    }
                }
            }
        }

        // Empirical assignment pass
        let replayed = self.replay_group(&group.key, group_size)?;
        let mut core_aggs: Vec<TagCountAggregator> =
            vec![TagCountAggregator::default(); candidates.len()];
        let mut full_aggs: Vec<TagCountAggregator> =
            vec![TagCountAggregator::default(); candidates.len()];
        let mut read_counts = vec![0u64; candidates.len()];

        for (local_idx, al) in replayed.alignments.iter().enumerate() {
            let mut cp1 = mapping[local_idx];
            if cp1 == NO_FEATURE {
                let suffixes = al.tag_count().key_suffixes(self.depth);
                for gt in GeneType::VJ_REFERENCE {
                    for hit in al.hits(gt) {
                        for suffix in suffixes.tuples() {
                            let key = (hit.gene.clone(), suffix.clone());
                            if offer(&mut cp1, index.gene_and_suffix.get(&key)) {
                                self.report.gat_empirically_assigned_alignments += 1;
                            }
                        }
                        if offer(&mut cp1, index.genes.get(&hit.gene)) {
                            self.report.vj_empirically_assigned_alignments += 1;
                        }
                    }
                }
                for suffix in suffixes.tuples() {
                    if offer(&mut cp1, index.suffixes.get(suffix)) {
                        self.report.umi_empirically_assigned_alignments += 1;
                    }
                }

                if cp1 > 0 {
                    mapping[local_idx] = cp1;
                    self.report.empirically_assigned_alignments += 1;
                } else if cp1 == AMBIGUOUS {
                    self.report.empirical_assignment_conflicts += 1;
                }
            } else if cp1 > 0 {
                core_aggs[cp1 as usize - 1].add(al.tag_count());
            }

            if cp1 > 0 {
                let c_idx = cp1 as usize - 1;
                full_aggs[c_idx].add(al.tag_count());
                read_counts[c_idx] += al.number_of_reads();
            } else {
                self.report.unassigned_alignments += 1;
            }
        }

        // Emission
        let mut clone_ids = vec![-1i64; candidates.len()];
        let mut clones = Vec::with_capacity(number_of_clones);
        for (c_idx, (candidate, gene_scores)) in candidates.into_iter().zip(gene_infos).enumerate()
        {
            if candidate.records.is_empty() {
                continue;
            }
            let id = self.next_clone_id;
            self.next_clone_id += 1;
            clone_ids[c_idx] = id;
            clones.push(PreClone {
                index: id,
                core_key: group.key.clone(),
                core_tag_count: std::mem::take(&mut core_aggs[c_idx]).build(),
                full_tag_count: std::mem::take(&mut full_aggs[c_idx]).build(),
                clonal_sequence: candidate.sequences,
                gene_scores,
                number_of_reads: read_counts[c_idx],
            });
        }

        let mapping = mapping
            .into_iter()
            .map(|cp1| {
                if cp1 > 0 {
                    clone_ids[cp1 as usize - 1]
                } else {
                    -1
                }
            })
            .collect();

        Ok(Some(PreCloneAssemblerResult {
            clones,
            group_key: group.key,
            group_size,
            mapping: Some(mapping),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::ConsensusResult;
    use crate::test_utils::{tt, AlignmentBuilder};
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};

    type Channel = std::vec::IntoIter<Result<VdjcAlignment>>;

    fn channel(alignments: &[VdjcAlignment]) -> Channel {
        alignments
            .iter()
            .cloned()
            .map(Ok)
            .collect::<Vec<_>>()
            .into_iter()
    }

    fn min_scores() -> BTreeMap<GeneType, f32> {
        BTreeMap::from([(GeneType::Variable, 0.8), (GeneType::Joining, 0.8)])
    }

    fn assembler(
        alignments: &[VdjcAlignment],
        parameters: PreCloneAssemblerParameters,
        depth: usize,
    ) -> PreCloneAssembler<Channel, Channel> {
        PreCloneAssembler::new(
            parameters,
            &[GeneFeature::CDR3],
            depth,
            channel(alignments),
            channel(alignments),
            &min_scores(),
        )
    }

    fn by_molecule() -> PreCloneAssemblerParameters {
        PreCloneAssemblerParameters::default_for(false)
    }

    #[test]
    fn test_empirical_assignment_by_unique_gene() -> Result<()> {
        let alignments = vec![
            AlignmentBuilder::new(0, &["C1", "U1"])
                .cdr3(b"TGTGCCAGC")
                .v("TRBV1", 200.0)
                .j("TRBJ1", 50.0)
                .build(),
            AlignmentBuilder::new(1, &["C1", "U2"])
                .cdr3(b"TGTGCCAGC")
                .v("TRBV1", 210.0)
                .j("TRBJ1", 55.0)
                .build(),
            AlignmentBuilder::new(2, &["C1", "U3"])
                .v("TRBV1", 150.0)
                .build(),
        ];
        let mut assembler = assembler(&alignments, by_molecule(), 1);
        let result = assembler.next_group()?.unwrap();
        assert!(assembler.next_group()?.is_none());

        assert_eq!(result.clones.len(), 1);
        let clone = &result.clones[0];
        assert_eq!(clone.core_key, tt(&["C1"]));
        assert_eq!(clone.core_tag_count.len(), 2);
        assert_eq!(clone.core_tag_count.get(&tt(&["C1", "U3"])), 0.0);
        assert_eq!(clone.full_tag_count.len(), 3);
        assert_eq!(clone.full_tag_count.get(&tt(&["C1", "U3"])), 1.0);
        assert_eq!(clone.number_of_reads, 3);
        assert_eq!(clone.best_gene(GeneType::Variable).unwrap().score, 205.0);
        assert_eq!(
            (0..3).map(|i| result.clone_for_alignment(i)).collect::<Vec<_>>(),
            vec![clone.index; 3]
        );

        let report = assembler.report();
        assert_eq!(report.core_alignments, 2);
        assert_eq!(report.empirically_assigned_alignments, 1);
        assert_eq!(report.vj_empirically_assigned_alignments, 1);
        assert_eq!(report.empirical_assignment_conflicts, 0);
        assert_eq!(report.unassigned_alignments, 0);
        Ok(())
    }

    #[test]
    fn test_conflicting_signals_leave_alignment_unassigned() -> Result<()> {
        let alignments = vec![
            AlignmentBuilder::new(0, &["C1", "U1"])
                .cdr3(b"TGTGCCAGC")
                .v("TRBV1", 200.0)
                .build(),
            AlignmentBuilder::new(1, &["C1", "U2"])
                .cdr3(b"TGTGCCTTT")
                .v("TRBV2", 200.0)
                .build(),
            // tag suffix of the first consensus, V gene of the second
            AlignmentBuilder::new(2, &["C1", "U1"])
                .v("TRBV2", 180.0)
                .build(),
        ];
        let mut assembler = assembler(&alignments, by_molecule(), 1);
        let result = assembler.next_group()?.unwrap();

        assert_eq!(result.clones.len(), 2);
        assert_eq!(result.clone_for_alignment(0), result.clones[0].index);
        assert_eq!(result.clone_for_alignment(1), result.clones[1].index);
        assert_eq!(result.clone_for_alignment(2), -1);
        for clone in &result.clones {
            assert_eq!(clone.full_tag_count.sum(), 1.0);
        }

        let report = assembler.report();
        assert_eq!(report.empirical_assignment_conflicts, 1);
        assert_eq!(report.empirically_assigned_alignments, 0);
        assert_eq!(report.unassigned_alignments, 1);
        Ok(())
    }

    #[test]
    fn test_single_molecule_scenario() -> Result<()> {
        let mut alignments: Vec<VdjcAlignment> = (0..4)
            .map(|i| {
                AlignmentBuilder::new(i, &["C1", "U1"])
                    .cdr3(b"TGTGCCAGCAGT")
                    .v("TRBV1", 200.0)
                    .j("TRBJ2", 60.0)
                    .build()
            })
            .collect();
        alignments.push(AlignmentBuilder::new(4, &["C1", "U1"]).j("TRBJ2", 58.0).build());

        let mut assembler = assembler(&alignments, by_molecule(), 2);
        let result = assembler.next_group()?.unwrap();

        assert_eq!(result.clones.len(), 1);
        let clone = &result.clones[0];
        assert_eq!(clone.core_key, tt(&["C1", "U1"]));
        assert_eq!(clone.core_tag_count.get(&tt(&["C1", "U1"])), 4.0);
        assert_eq!(clone.full_tag_count.get(&tt(&["C1", "U1"])), 5.0);
        assert!((0..5).all(|i| result.clone_for_alignment(i) == clone.index));

        let report = assembler.report();
        assert_eq!(report.input_alignments, 5);
        assert_eq!(report.input_assembling_feature_sequences, 4);
        assert_eq!(report.core_alignments, 4);
        assert_eq!(report.empirically_assigned_alignments, 1);
        assert_eq!(report.empirical_assignment_conflicts, 0);
        assert_eq!(report.unassigned_alignments, 0);
        assert_eq!(report.clonotypes_per_group, BTreeMap::from([(1, 1)]));
        Ok(())
    }

    #[test]
    fn test_tag_suffix_decontamination() -> Result<()> {
        let alignments = vec![
            AlignmentBuilder::new(0, &["C1", "U1"]).cdr3(b"TGTGCC").build(),
            AlignmentBuilder::new(1, &["C1", "U1"]).cdr3(b"TGTGCC").build(),
            AlignmentBuilder::new(2, &["C1", "U2"]).cdr3(b"TGTGCC").build(),
            // minority sequence sharing U2 with the main consensus
            AlignmentBuilder::new(3, &["C1", "U2"]).cdr3(b"TGTAAA").build(),
        ];
        let parameters = PreCloneAssemblerParameters::default_for(true);
        let mut assembler = assembler(&alignments, parameters, 1);
        let result = assembler.next_group()?.unwrap();

        assert_eq!(result.clones.len(), 1);
        let clone = &result.clones[0];
        assert_eq!(clone.core_tag_count.get(&tt(&["C1", "U1"])), 2.0);
        assert_eq!(clone.core_tag_count.get(&tt(&["C1", "U2"])), 0.0);
        assert_eq!(result.clone_for_alignment(0), clone.index);
        assert_eq!(result.clone_for_alignment(2), -1);
        assert_eq!(result.clone_for_alignment(3), -1);

        let report = assembler.report();
        assert_eq!(report.core_clonotypes_dropped_by_tag_suffix, 1);
        assert_eq!(report.core_alignments_dropped_by_tag_suffix, 1);
        assert_eq!(report.core_alignments, 2);
        assert_eq!(report.discarded_core_alignments, 2);
        Ok(())
    }

    #[derive(Clone, Default)]
    struct FailedIds(Arc<Mutex<Vec<u64>>>);

    impl ClonalSequenceExtractionListener for FailedIds {
        fn on_failed_to_extract(&mut self, al: &VdjcAlignment) {
            self.0.lock().unwrap().push(al.alignment_id());
        }
    }

    #[test]
    fn test_group_without_assembling_features() -> Result<()> {
        let alignments = vec![
            AlignmentBuilder::new(0, &["C1", "U1"]).v("TRBV1", 100.0).build(),
            AlignmentBuilder::new(1, &["C1", "U2"]).build(),
            AlignmentBuilder::new(2, &["C2", "U1"]).cdr3(b"TGTGCC").build(),
        ];
        let failed = FailedIds::default();
        let mut assembler = assembler(&alignments, by_molecule(), 1);
        assembler.set_extraction_listener(failed.clone())?;
        assert!(assembler.set_extraction_listener(failed.clone()).is_err());

        let first = assembler.next_group()?.unwrap();
        assert!(first.clones.is_empty());
        assert_eq!(first.clone_for_alignment(1), -1);

        let second = assembler.next_group()?.unwrap();
        assert_eq!(second.clones.len(), 1);
        assert_eq!(second.clones[0].index, 0);
        assert!(assembler.next_group()?.is_none());

        assert_eq!(*failed.0.lock().unwrap(), vec![0, 1]);
        let report = assembler.report();
        assert_eq!(report.input_groups, 2);
        assert_eq!(report.groups_with_no_assembling_feature, 1);
        Ok(())
    }

    #[test]
    fn test_clone_ids_increase_across_groups() -> Result<()> {
        let alignments: Vec<_> = ["C1", "C2", "C3"]
            .iter()
            .enumerate()
            .map(|(i, &cell)| {
                AlignmentBuilder::new(i as u64, &[cell, "U1"])
                    .cdr3(b"TGTGCC")
                    .build()
            })
            .collect();
        let mut assembler = assembler(&alignments, by_molecule(), 1);
        let mut ids = Vec::new();
        while let Some(result) = assembler.next_group()? {
            ids.extend(result.clones.iter().map(|c| c.index));
        }
        assert_eq!(ids, vec![0, 1, 2]);
        Ok(())
    }

    /// Always builds one consensus from rows 0 and 2.
    struct FirstAndThird;

    impl ConsensusAssembler for FirstAndThird {
        fn compute_consensuses(&self, rows: &[Vec<SequenceWithQuality>]) -> Vec<ConsensusResult> {
            assert_eq!(rows.len(), 3);
            vec![ConsensusResult {
                records_used: [0usize, 2].into_iter().collect(),
                sequences: vec![SequenceWithQuality::with_uniform_quality(b"TGTTTT", 40)],
            }]
        }
    }

    #[test]
    fn test_custom_consensus_assembler() -> Result<()> {
        let alignments = vec![
            AlignmentBuilder::new(0, &["C1", "U1"]).cdr3(b"TGTGCC").build(),
            AlignmentBuilder::new(1, &["C1", "U2"]).cdr3(b"TGTAAA").build(),
            AlignmentBuilder::new(2, &["C1", "U3"]).cdr3(b"TGTCCC").build(),
        ];
        let mut assembler =
            assembler(&alignments, by_molecule(), 1).with_consensus_assembler(FirstAndThird);
        let result = assembler.next_group()?.unwrap();

        assert_eq!(result.clones.len(), 1);
        let clone = &result.clones[0];
        assert_eq!(clone.clonal_sequence[0].sequence(), b"TGTTTT");
        assert_eq!(clone.core_tag_count.get(&tt(&["C1", "U1"])), 1.0);
        assert_eq!(clone.core_tag_count.get(&tt(&["C1", "U2"])), 0.0);
        assert_eq!(clone.core_tag_count.get(&tt(&["C1", "U3"])), 1.0);
        let mapping: Vec<_> = (0..3).map(|i| result.clone_for_alignment(i)).collect();
        assert_eq!(mapping, vec![0, -1, 0]);
        assert_eq!(assembler.report().discarded_core_alignments, 1);
        Ok(())
    }

    #[test]
    fn test_desynchronized_channels() {
        let alignments = vec![
            AlignmentBuilder::new(0, &["C1", "U1"]).cdr3(b"TGTGCC").build(),
            AlignmentBuilder::new(1, &["C1", "U2"]).cdr3(b"TGTGCC").build(),
        ];
        let mut assembler = PreCloneAssembler::new(
            by_molecule(),
            &[GeneFeature::CDR3],
            1,
            channel(&alignments),
            channel(&alignments[..1]),
            &min_scores(),
        );
        let err = assembler.next_group().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PreCloneError>(),
            Some(PreCloneError::DesynchronizedGroups(_))
        ));
    }
}
