use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use vdj_types::GeneType;

/// Counters collected by the pre-clone assembler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreCloneAssemblerReport {
    pub input_groups: u64,
    pub input_alignments: u64,
    pub input_assembling_feature_sequences: u64,
    pub groups_with_no_assembling_feature: u64,
    pub clonotypes: u64,
    /// Number of groups per number of pre-clones in the group.
    pub clonotypes_per_group: BTreeMap<usize, u64>,
    pub assembling_feature_sequences_in_zero_pre_clones: u64,
    pub core_clonotypes_dropped_by_tag_suffix: u64,
    pub core_alignments_dropped_by_tag_suffix: u64,
    pub core_alignments: u64,
    pub discarded_core_alignments: u64,
    pub empirically_assigned_alignments: u64,
    pub vj_empirically_assigned_alignments: u64,
    pub umi_empirically_assigned_alignments: u64,
    pub gat_empirically_assigned_alignments: u64,
    pub empirical_assignment_conflicts: u64,
    pub unassigned_alignments: u64,
    pub umi_conflicts: u64,
    pub gat_conflicts: u64,
    pub gene_conflicts: BTreeMap<GeneType, u64>,
}

impl PreCloneAssemblerReport {
    /// Add the counters of `other` to this report.
    pub fn merge(&mut self, other: &PreCloneAssemblerReport) {
        self.input_groups += other.input_groups;
        self.input_alignments += other.input_alignments;
        self.input_assembling_feature_sequences += other.input_assembling_feature_sequences;
        self.groups_with_no_assembling_feature += other.groups_with_no_assembling_feature;
        self.clonotypes += other.clonotypes;
        for (&n, &count) in &other.clonotypes_per_group {
            *self.clonotypes_per_group.entry(n).or_insert(0) += count;
        }
        self.assembling_feature_sequences_in_zero_pre_clones +=
            other.assembling_feature_sequences_in_zero_pre_clones;
        self.core_clonotypes_dropped_by_tag_suffix += other.core_clonotypes_dropped_by_tag_suffix;
        self.core_alignments_dropped_by_tag_suffix += other.core_alignments_dropped_by_tag_suffix;
        self.core_alignments += other.core_alignments;
        self.discarded_core_alignments += other.discarded_core_alignments;
        self.empirically_assigned_alignments += other.empirically_assigned_alignments;
        self.vj_empirically_assigned_alignments += other.vj_empirically_assigned_alignments;
        self.umi_empirically_assigned_alignments += other.umi_empirically_assigned_alignments;
        self.gat_empirically_assigned_alignments += other.gat_empirically_assigned_alignments;
        self.empirical_assignment_conflicts += other.empirical_assignment_conflicts;
        self.unassigned_alignments += other.unassigned_alignments;
        self.umi_conflicts += other.umi_conflicts;
        self.gat_conflicts += other.gat_conflicts;
        for (&gt, &count) in &other.gene_conflicts {
            *self.gene_conflicts.entry(gt).or_insert(0) += count;
        }
    }

    pub fn gene_conflicts_for(&self, gene_type: GeneType) -> u64 {
        self.gene_conflicts.get(&gene_type).copied().unwrap_or(0)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn percent(value: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        100.0 * value as f64 / total as f64
    }
}

impl fmt::Display for PreCloneAssemblerReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let field = |f: &mut fmt::Formatter<'_>, name: &str, value: u64, total: u64| {
            writeln!(f, "{name}: {value} ({:.2}%)", percent(value, total))
        };
        writeln!(f, "Number of input groups: {}", self.input_groups)?;
        writeln!(f, "Number of input alignments: {}", self.input_alignments)?;
        writeln!(f, "Number of output pre-clonotypes: {}", self.clonotypes)?;
        writeln!(f, "Number of clonotypes per group")?;
        for (n, groups) in &self.clonotypes_per_group {
            writeln!(f, "  {n}: {groups}")?;
        }
        let total = self.input_alignments;
        field(f, "Number of core alignments", self.core_alignments, total)?;
        field(
            f,
            "Discarded core alignments",
            self.discarded_core_alignments,
            self.core_alignments,
        )?;
        field(
            f,
            "Empirically assigned alignments",
            self.empirically_assigned_alignments,
            total,
        )?;
        field(
            f,
            "Empirical assignment conflicts",
            self.empirical_assignment_conflicts,
            total,
        )?;
        field(
            f,
            "UMI+VJ-gene empirically assigned alignments",
            self.gat_empirically_assigned_alignments,
            total,
        )?;
        field(
            f,
            "VJ-gene empirically assigned alignments",
            self.vj_empirically_assigned_alignments,
            total,
        )?;
        field(
            f,
            "UMI empirically assigned alignments",
            self.umi_empirically_assigned_alignments,
            total,
        )?;
        writeln!(f, "Number of ambiguous UMIs: {}", self.umi_conflicts)?;
        for (gt, &count) in &self.gene_conflicts {
            if count > 0 {
                writeln!(f, "Number of ambiguous {gt}-genes: {count}")?;
            }
        }
        writeln!(
            f,
            "Number of ambiguous UMI+V/J-gene combinations: {}",
            self.gat_conflicts
        )?;
        field(f, "Unassigned alignments", self.unassigned_alignments, total)
    }
}
