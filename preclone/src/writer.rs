//! Writer of pre-clone files.
//!
//! Layout of the file:
//! ```text
//! version string, header                      (raw bincode values)
//! unassigned alignments, in arrival order     (blocks) + marker 1
//! assigned alignments, by dense clone index   (blocks) + marker 2
//! pre-clones, by dense index                  (blocks) + marker 3
//! footer                                      (6 x u64, big endian)
//! ```
//! The footer holds the offsets of the three sections followed by the number of
//! alignments, of assigned alignments and of pre-clones.

use crate::errors::PreCloneError;
use crate::parameters::WriterParameters;
use crate::pre_clone::{CloneIdOrder, PreClone, PreCloneOrder};
use crate::progress::ProgressAndStage;
use crate::sort_stage::{item_buffer_for, SortStage};
use anyhow::{Context, Result};
use block_io::{BlockHeader, BlockOutput};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use vdj_types::{AlignerParameters, GeneFeature, GeneReference, TagsInfo, VdjcAlignment};

pub const FORMAT_VERSION: &str = "preclones.v1";

pub const UNASSIGNED_END: u8 = 1;
pub const ALIGNMENTS_END: u8 = 2;
pub const CLONES_END: u8 = 3;

/// Number of `u64` values in the footer.
pub const FOOTER_LEN: usize = 6;

const CHECKSUM_SEED: i64 = 17;
const APPROX_ALIGNMENT_BYTES: u64 = 1 << 10;
const APPROX_CLONE_BYTES: u64 = 1 << 11;

/// Metadata stored at the start of a pre-clone file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreCloneFileHeader {
    pub aligner_parameters: AlignerParameters,
    pub number_of_reads: u64,
    pub assembling_features: Vec<GeneFeature>,
    pub tags_info: TagsInfo,
    pub used_genes: Vec<GeneReference>,
}

/// Order dependent hash of a sequence of `(old, new)` clone index pairs.
pub(crate) fn fold_checksum(checksum: i64, old_index: i64, new_index: i64) -> i64 {
    let checksum = checksum.wrapping_mul(71).wrapping_add(old_index);
    checksum.wrapping_mul(71).wrapping_add(new_index)
}

struct Sections {
    alignments_offset: u64,
    alignments: SortStage<VdjcAlignment, CloneIdOrder>,
    clones: SortStage<PreClone, PreCloneOrder>,
}

pub struct FilePreCloneWriter {
    path: PathBuf,
    parameters: WriterParameters,
    output: BlockOutput<File>,
    // dropped before the spill directory, joining the sort threads
    sections: Option<Sections>,
    number_of_alignments: u64,
    number_of_assigned_alignments: u64,
    number_of_clones: u64,
    progress: ProgressAndStage,
    spill_dir: TempDir,
}

impl FilePreCloneWriter {
    pub fn create(path: &Path, parameters: WriterParameters) -> Result<Self> {
        let file = File::create(path).with_context(|| path.display().to_string())?;
        let spill_dir = {
            let mut builder = tempfile::Builder::new();
            builder.prefix(&parameters.spill_prefix);
            match &parameters.spill_dir {
                Some(dir) => builder
                    .tempdir_in(dir)
                    .with_context(|| dir.display().to_string())?,
                None => builder.tempdir()?,
            }
        };
        Ok(FilePreCloneWriter {
            path: path.to_path_buf(),
            output: BlockOutput::new(file, parameters.records_per_block),
            parameters,
            sections: None,
            number_of_alignments: 0,
            number_of_assigned_alignments: 0,
            number_of_clones: 0,
            progress: ProgressAndStage::new("Initialization"),
            spill_dir,
        })
    }

    /// Directory holding the shard files of this write session.
    pub fn spill_dir(&self) -> &Path {
        self.spill_dir.path()
    }

    pub fn progress(&self) -> ProgressAndStage {
        self.progress.clone()
    }

    pub fn init(&mut self, header: &PreCloneFileHeader) -> Result<()> {
        if self.sections.is_some() {
            return Err(PreCloneError::AlreadyInitialized.into());
        }
        self.output.write_raw(FORMAT_VERSION)?;
        self.output.write_raw(header)?;
        let alignments_offset = self.output.position()?;

        let budget = self.parameters.sort_memory_budget();
        let alignments = SortStage::spawn(
            "alignments",
            &self.spill_dir.path().join("al.pre.shard"),
            self.parameters.alignment_buffer_size,
            item_buffer_for(budget, APPROX_ALIGNMENT_BYTES),
        )?;
        let clones = SortStage::spawn(
            "clones",
            &self.spill_dir.path().join("cl.pre.shard"),
            self.parameters.clone_buffer_size,
            item_buffer_for(budget, APPROX_CLONE_BYTES),
        )?;
        self.sections = Some(Sections {
            alignments_offset,
            alignments,
            clones,
        });
        self.progress.set_stage("Collecting alignments and clones");
        Ok(())
    }

    fn sections(&mut self) -> Result<&mut Sections> {
        Ok(self
            .sections
            .as_mut()
            .ok_or(PreCloneError::NotInitialized)?)
    }

    pub fn put_alignment(&mut self, al: VdjcAlignment) -> Result<()> {
        self.sections()?;
        self.number_of_alignments += 1;
        if al.is_assigned() {
            self.number_of_assigned_alignments += 1;
            self.sections()?.alignments.send(al)
        } else {
            self.output.write_record(&al)?;
            Ok(())
        }
    }

    pub fn put_clone(&mut self, clone: PreClone) -> Result<()> {
        self.sections()?.clones.send(clone)?;
        self.number_of_clones += 1;
        Ok(())
    }

    /// Sort and write the assigned alignments and the pre-clones, then the footer.
    pub fn finish(mut self) -> Result<()> {
        let Sections {
            alignments_offset,
            alignments,
            clones,
        } = self.sections.take().ok_or(PreCloneError::NotInitialized)?;

        self.progress.set_stage("Sorting alignments and clones");
        let alignments = alignments.finish()?;
        let clones = clones.finish()?;

        self.output.write_marker(BlockHeader::special(UNASSIGNED_END))?;
        let assigned_offset = self.output.position()?;

        self.progress.set_stage("Writing alignments");
        let mut alignments_checksum = CHECKSUM_SEED;
        let mut previous_clone: Option<i64> = None;
        let mut next_index = -1i64;
        let mut written = 0u64;
        let reader = alignments.reader()?;
        for al in reader.iter_range(&shardio::Range::all())? {
            let al = al?;
            if previous_clone != Some(al.clone_index()) {
                previous_clone = Some(al.clone_index());
                next_index += 1;
                alignments_checksum =
                    fold_checksum(alignments_checksum, al.clone_index(), next_index);
            }
            self.output.write_record(&al.with_clone_index(next_index))?;
            written += 1;
            self.progress
                .set_progress(written as f64 / self.number_of_assigned_alignments as f64);
        }
        self.output.write_marker(BlockHeader::special(ALIGNMENTS_END))?;
        let clones_offset = self.output.position()?;

        self.progress.set_stage("Writing clones");
        let mut clones_checksum = CHECKSUM_SEED;
        let reader = clones.reader()?;
        for (new_index, clone) in reader.iter_range(&shardio::Range::all())?.enumerate() {
            let clone = clone?;
            let new_index = new_index as i64;
            clones_checksum = fold_checksum(clones_checksum, clone.index, new_index);
            self.output.write_record(&clone.with_index(new_index))?;
            self.progress
                .set_progress((new_index + 1) as f64 / self.number_of_clones as f64);
        }
        self.output.write_marker(BlockHeader::special(CLONES_END))?;

        if alignments_checksum != clones_checksum {
            return Err(PreCloneError::InconsistentClones {
                alignments_checksum,
                clones_checksum,
            }
            .into());
        }

        for value in [
            alignments_offset,
            assigned_offset,
            clones_offset,
            self.number_of_alignments,
            self.number_of_assigned_alignments,
            self.number_of_clones,
        ] {
            self.output.write_u64(value)?;
        }
        let file = self.output.finish()?;
        file.sync_all()?;

        info!(
            "wrote {} alignments ({} assigned) and {} pre-clones to {} \
             (sections at {alignments_offset}, {assigned_offset}, {clones_offset})",
            self.number_of_alignments,
            self.number_of_assigned_alignments,
            self.number_of_clones,
            self.path.display(),
        );
        self.progress.finish();
        Ok(())
    }
}
