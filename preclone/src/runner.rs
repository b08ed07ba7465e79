use crate::assembler::PreCloneAssembler;
use crate::consensus::ConsensusAssembler;
use crate::errors::PreCloneError;
use crate::grouping::AlignmentGroups;
use crate::parameters::{PreCloneAssemblerParameters, WriterParameters};
use crate::progress::ProgressAndStage;
use crate::reader::FilePreCloneReader;
use crate::report::PreCloneAssemblerReport;
use crate::source::{AlignmentCursor, AlignmentSource};
use crate::writer::{FilePreCloneWriter, PreCloneFileHeader};
use anyhow::Result;
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use vdj_types::{GeneFeature, TagType};

/// Assembles pre-clones from a tag-sorted alignment source and writes them, together
/// with all alignments, to a pre-clone file.
pub struct PreCloneAssemblerRunner<S> {
    source: S,
    grouping: TagType,
    depth: usize,
    assembling_features: Vec<GeneFeature>,
    parameters: PreCloneAssemblerParameters,
    output: PathBuf,
    writer_parameters: WriterParameters,
    consensus_assembler: Option<Arc<dyn ConsensusAssembler + Send + Sync>>,
    progress: ProgressAndStage,
}

impl<S: AlignmentSource> PreCloneAssemblerRunner<S> {
    pub fn new(
        source: S,
        grouping: TagType,
        assembling_features: &[GeneFeature],
        parameters: PreCloneAssemblerParameters,
        output: &Path,
        writer_parameters: WriterParameters,
    ) -> Result<Self> {
        let tags_info = &source.metadata().tags_info;
        let depth = tags_info
            .depth_for(grouping)
            .ok_or(PreCloneError::UnknownGroupingLevel(grouping))?;
        if tags_info.sorting_level < depth {
            return Err(PreCloneError::InsufficientSorting {
                sorting_level: tags_info.sorting_level,
                required: depth,
                grouping,
            }
            .into());
        }
        Ok(PreCloneAssemblerRunner {
            source,
            grouping,
            depth,
            assembling_features: assembling_features.to_vec(),
            parameters,
            output: output.to_path_buf(),
            writer_parameters,
            consensus_assembler: None,
            progress: ProgressAndStage::new("Initialization"),
        })
    }

    /// Build consensuses with `consensus_assembler` instead of merging identical
    /// sequences.
    pub fn with_consensus_assembler(
        mut self,
        consensus_assembler: impl ConsensusAssembler + Send + Sync + 'static,
    ) -> Self {
        self.consensus_assembler = Some(Arc::new(consensus_assembler));
        self
    }

    pub fn progress(&self) -> ProgressAndStage {
        self.progress.clone()
    }

    /// Progress is finished when this returns, whether it succeeded or not.
    pub fn run(&self) -> Result<PreCloneAssemblerReport> {
        let result = self.assemble_and_write();
        self.progress.finish();
        result
    }

    fn assemble_and_write(&self) -> Result<PreCloneAssemblerReport> {
        let metadata = self.source.metadata();
        info!(
            "assembling pre-clones of {} alignments grouped by {} (depth {})",
            self.source.number_of_alignments(),
            self.grouping,
            self.depth
        );

        let channel1 = self.source.cursor()?;
        let channel2 = self.source.cursor()?;
        let mut groups = AlignmentGroups::new(self.source.cursor()?, self.depth);
        self.progress
            .delegate("Building pre-clones from tag groups", channel1.progress());

        let mut writer = FilePreCloneWriter::create(&self.output, self.writer_parameters.clone())?;
        writer.init(&PreCloneFileHeader {
            aligner_parameters: metadata.aligner_parameters.clone(),
            number_of_reads: metadata.number_of_reads,
            assembling_features: self.assembling_features.clone(),
            tags_info: metadata.tags_info.with_sorting_level(self.depth),
            used_genes: metadata.used_genes.clone(),
        })?;

        let mut assembler = PreCloneAssembler::new(
            self.parameters.clone(),
            &self.assembling_features,
            self.depth,
            channel1,
            channel2,
            &metadata.aligner_parameters,
        );
        if let Some(consensus_assembler) = &self.consensus_assembler {
            assembler = assembler.with_consensus_assembler(Arc::clone(consensus_assembler));
        }

        while let Some(result) = assembler.next_group()? {
            let group = groups.next().transpose()?.ok_or_else(|| {
                PreCloneError::DesynchronizedGroups(format!(
                    "no alignments left for group {}",
                    result.group_key()
                ))
            })?;
            if &group.key != result.group_key() || group.alignments.len() != result.group_size()
            {
                return Err(PreCloneError::DesynchronizedGroups(format!(
                    "pre-clones of group {} ({} alignments) do not match group {} ({} alignments)",
                    result.group_key(),
                    result.group_size(),
                    group.key,
                    group.alignments.len()
                ))
                .into());
            }

            for (local_idx, al) in group.alignments.into_iter().enumerate() {
                let clone_id = result.clone_for_alignment(local_idx);
                if clone_id >= 0 {
                    writer.put_alignment(al.with_clone_index_and_mapping_type(clone_id, 0))?;
                } else {
                    writer.put_alignment(al)?;
                }
            }
            for clone in result.clones {
                writer.put_clone(clone)?;
            }
        }

        if let Some(group) = groups.next().transpose()? {
            return Err(PreCloneError::DesynchronizedGroups(format!(
                "group {} was not assembled",
                group.key
            ))
            .into());
        }

        info!("writing pre-clones to {}", self.output.display());
        self.progress.delegate("Writing pre-clones", writer.progress());
        writer.finish()?;

        let report = assembler.into_report();
        info!(
            "assembled {} pre-clones in {} groups",
            report.clonotypes, report.input_groups
        );
        Ok(report)
    }

    /// Reader of the output file, available once [`Self::run`] succeeded.
    pub fn create_reader(&self) -> Result<FilePreCloneReader> {
        FilePreCloneReader::open(&self.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::ConsensusResult;
    use crate::progress::{CanReportProgress, CanReportProgressAndStage};
    use crate::source::AlignmentArena;
    use crate::test_utils::{cell_umi_metadata, tt, AlignmentBuilder};
    use pretty_assertions::assert_eq;
    use vdj_types::{SequenceWithQuality, TagCount, VdjcAlignment};

    fn arena() -> AlignmentArena {
        AlignmentArena::new(
            cell_umi_metadata(),
            vec![
                AlignmentBuilder::new(0, &["C1", "U1"])
                    .cdr3(b"TGTGCCAGC")
                    .v("TRBV1", 200.0)
                    .reads(2)
                    .build(),
                AlignmentBuilder::new(1, &["C1", "U1"])
                    .cdr3(b"TGTGCCAGC")
                    .v("TRBV1", 190.0)
                    .build(),
                AlignmentBuilder::new(2, &["C1", "U2"]).v("TRBV1", 120.0).build(),
                AlignmentBuilder::new(3, &["C2", "U1"])
                    .cdr3(b"TGTGCCTTT")
                    .v("TRBV5", 210.0)
                    .build(),
                AlignmentBuilder::new(4, &["C3", "U7"]).build(),
            ],
        )
    }

    #[test]
    fn test_end_to_end() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let output = dir.path().join("run.preclones");
        let runner = PreCloneAssemblerRunner::new(
            arena(),
            TagType::Cell,
            &[GeneFeature::CDR3],
            PreCloneAssemblerParameters::default_for(true),
            &output,
            WriterParameters::default(),
        )?;
        let progress = runner.progress();
        let report = runner.run()?;
        assert!(progress.is_finished());
        assert_eq!(progress.stage(), "Writing pre-clones");

        assert_eq!(report.input_groups, 3);
        assert_eq!(report.input_alignments, 5);
        assert_eq!(report.clonotypes, 2);
        assert_eq!(report.groups_with_no_assembling_feature, 1);
        assert_eq!(report.empirically_assigned_alignments, 1);
        assert_eq!(report.unassigned_alignments, 0);

        let reader = runner.create_reader()?;
        assert_eq!(reader.header().tags_info.sorting_level, 1);
        assert_eq!(reader.header().number_of_reads, 100);
        let clones = reader.read_pre_clones()?.collect::<Result<Vec<_>>>()?;
        assert_eq!(clones.len(), 2);
        assert_eq!(clones[0].core_key, tt(&["C1"]));
        assert_eq!(clones[0].number_of_reads, 4);
        assert_eq!(clones[0].full_tag_count.sum(), 3.0);
        assert_eq!(clones[1].core_key, tt(&["C2"]));

        let assigned: Vec<_> = reader
            .read_assigned_alignments()?
            .map(|al| al.map(|al| (al.alignment_id(), al.clone_index())))
            .collect::<Result<_>>()?;
        assert_eq!(assigned, vec![(0, 0), (1, 0), (2, 0), (3, 1)]);
        let unassigned = reader
            .read_unassigned_alignments()?
            .collect::<Result<Vec<_>>>()?;
        assert_eq!(
            unassigned.iter().map(VdjcAlignment::alignment_id).collect::<Vec<_>>(),
            vec![4]
        );
        Ok(())
    }

    struct NoConsensus;

    impl ConsensusAssembler for NoConsensus {
        fn compute_consensuses(&self, _rows: &[Vec<SequenceWithQuality>]) -> Vec<ConsensusResult> {
            Vec::new()
        }
    }

    #[test]
    fn test_custom_consensus_assembler() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let output = dir.path().join("none.preclones");
        let runner = PreCloneAssemblerRunner::new(
            arena(),
            TagType::Cell,
            &[GeneFeature::CDR3],
            PreCloneAssemblerParameters::default_for(true),
            &output,
            WriterParameters::default(),
        )?
        .with_consensus_assembler(NoConsensus);
        let report = runner.run()?;
        assert_eq!(report.clonotypes, 0);
        assert_eq!(report.discarded_core_alignments, 3);

        let reader = runner.create_reader()?;
        assert_eq!(reader.number_of_clones(), 0);
        assert_eq!(reader.number_of_assigned_alignments(), 0);
        assert_eq!(reader.read_unassigned_alignments()?.count(), 5);
        Ok(())
    }

    #[test]
    fn test_progress_finished_on_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        // an alignment aggregated over two cells can not be grouped by cell
        let aggregated =
            TagCount::from_counts([(tt(&["C1", "U1"]), 1.0), (tt(&["C2", "U1"]), 1.0)]);
        let runner = PreCloneAssemblerRunner::new(
            AlignmentArena::new(cell_umi_metadata(), vec![VdjcAlignment::new(0, aggregated)]),
            TagType::Cell,
            &[GeneFeature::CDR3],
            PreCloneAssemblerParameters::default_for(true),
            &dir.path().join("failed.preclones"),
            WriterParameters::default(),
        )?;
        let progress = runner.progress();
        let err = runner.run().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PreCloneError>(),
            Some(PreCloneError::AggregatedTagCount { alignment_id: 0, .. })
        ));
        assert!(progress.is_finished());
        Ok(())
    }

    #[test]
    fn test_insufficient_sorting() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut metadata = cell_umi_metadata();
        metadata.tags_info = metadata.tags_info.with_sorting_level(1);
        let err = PreCloneAssemblerRunner::new(
            AlignmentArena::new(metadata, Vec::new()),
            TagType::Molecule,
            &[GeneFeature::CDR3],
            PreCloneAssemblerParameters::default(),
            &dir.path().join("never.preclones"),
            WriterParameters::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(
            err.downcast_ref::<PreCloneError>(),
            Some(PreCloneError::InsufficientSorting {
                sorting_level: 1,
                required: 2,
                ..
            })
        ));
        assert!(!dir.path().join("never.preclones").exists());
        Ok(())
    }

    #[test]
    fn test_unknown_grouping_level() {
        let err = PreCloneAssemblerRunner::new(
            AlignmentArena::new(cell_umi_metadata(), Vec::new()),
            TagType::Sample,
            &[GeneFeature::CDR3],
            PreCloneAssemblerParameters::default(),
            Path::new("unused"),
            WriterParameters::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(
            err.downcast_ref::<PreCloneError>(),
            Some(PreCloneError::UnknownGroupingLevel(TagType::Sample))
        ));
    }
}
