//! Readers of pre-clones and of the alignments assigned to them.

use crate::assembler::ClonalSequenceExtractionListener;
use crate::pre_clone::PreClone;
use crate::progress::ProgressCounter;
use crate::source::{AlignmentCursor, AlignmentSource};
use crate::writer::{
    PreCloneFileHeader, ALIGNMENTS_END, CLONES_END, FOOTER_LEN, FORMAT_VERSION, UNASSIGNED_END,
};
use anyhow::{anyhow, Context, Result};
use block_io::{read_footer, read_raw, BlockHeader, BlockStream, HeaderAction};
use serde::de::DeserializeOwned;
use std::cell::Cell;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use vdj_types::{GeneFeature, VdjcAlignment};

/// Source of pre-clones and of the alignments they were built from.
pub trait PreCloneReader {
    type PreClones: Iterator<Item = Result<PreClone>>;
    type Alignments: Iterator<Item = Result<VdjcAlignment>>;

    fn read_pre_clones(&self) -> Result<Self::PreClones>;

    /// All alignments, assigned ones carrying the index of their pre-clone.
    fn read_alignments(&self) -> Result<Self::Alignments>;

    fn total_number_of_reads(&self) -> u64;
}

/// Records of one file section.
pub struct RecordStream<T> {
    inner: BlockStream<T>,
    progress: ProgressCounter,
}

impl<T: DeserializeOwned> RecordStream<T> {
    fn open(
        path: &Path,
        offset: u64,
        expected: u64,
        on_special: impl FnMut(&BlockHeader) -> HeaderAction + Send + 'static,
    ) -> Result<Self> {
        Ok(RecordStream {
            inner: BlockStream::open(path, offset, on_special)
                .with_context(|| path.display().to_string())?,
            progress: ProgressCounter::new(expected),
        })
    }

    pub fn progress(&self) -> ProgressCounter {
        self.progress.clone()
    }
}

impl<T: DeserializeOwned> Iterator for RecordStream<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next() {
            Some(Ok(record)) => {
                self.progress.inc();
                Some(Ok(record))
            }
            Some(Err(err)) => Some(Err(err.into())),
            None => {
                self.progress.finish();
                None
            }
        }
    }
}

impl AlignmentCursor for RecordStream<VdjcAlignment> {
    fn progress(&self) -> ProgressCounter {
        self.progress.clone()
    }
}

fn stop_at(marker: u8) -> impl FnMut(&BlockHeader) -> HeaderAction + Send + 'static {
    move |header| {
        if header.special_byte(0) == marker {
            HeaderAction::Stop
        } else {
            HeaderAction::Fail
        }
    }
}

/// Random access reader of a file written by
/// [`FilePreCloneWriter`](crate::writer::FilePreCloneWriter).
#[derive(Debug, Clone)]
pub struct FilePreCloneReader {
    path: PathBuf,
    header: PreCloneFileHeader,
    alignments_offset: u64,
    assigned_offset: u64,
    clones_offset: u64,
    number_of_alignments: u64,
    number_of_assigned_alignments: u64,
    number_of_clones: u64,
}

impl FilePreCloneReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| path.display().to_string())?;
        let mut reader = BufReader::new(file);
        let version: String = read_raw(&mut reader)?;
        if version != FORMAT_VERSION {
            return Err(block_io::Error::UnsupportedFormat {
                expected: FORMAT_VERSION.to_string(),
                found: version,
            })
            .with_context(|| path.display().to_string());
        }
        let header: PreCloneFileHeader = read_raw(&mut reader)?;

        let footer: [u64; FOOTER_LEN] = read_footer(path, FOOTER_LEN)?
            .try_into()
            .map_err(|_| anyhow!("{}: malformed footer", path.display()))?;
        let [
            alignments_offset,
            assigned_offset,
            clones_offset,
            number_of_alignments,
            number_of_assigned_alignments,
            number_of_clones,
        ] = footer;
        if number_of_assigned_alignments > number_of_alignments {
            return Err(block_io::Error::InvalidFooter(format!(
                "{number_of_assigned_alignments} assigned alignments out of {number_of_alignments}"
            )))
            .with_context(|| path.display().to_string());
        }
        if !(alignments_offset <= assigned_offset && assigned_offset <= clones_offset) {
            return Err(block_io::Error::InvalidFooter(format!(
                "unordered offsets {alignments_offset}, {assigned_offset}, {clones_offset}"
            )))
            .with_context(|| path.display().to_string());
        }

        Ok(FilePreCloneReader {
            path: path.to_path_buf(),
            header,
            alignments_offset,
            assigned_offset,
            clones_offset,
            number_of_alignments,
            number_of_assigned_alignments,
            number_of_clones,
        })
    }

    pub fn header(&self) -> &PreCloneFileHeader {
        &self.header
    }

    pub fn assembling_features(&self) -> &[GeneFeature] {
        &self.header.assembling_features
    }

    pub fn number_of_alignments(&self) -> u64 {
        self.number_of_alignments
    }

    pub fn number_of_assigned_alignments(&self) -> u64 {
        self.number_of_assigned_alignments
    }

    pub fn number_of_unassigned_alignments(&self) -> u64 {
        // assigned <= total is checked in open
        self.number_of_alignments - self.number_of_assigned_alignments
    }

    pub fn number_of_clones(&self) -> u64 {
        self.number_of_clones
    }

    pub fn read_unassigned_alignments(&self) -> Result<RecordStream<VdjcAlignment>> {
        RecordStream::open(
            &self.path,
            self.alignments_offset,
            self.number_of_unassigned_alignments(),
            stop_at(UNASSIGNED_END),
        )
    }

    /// Assigned alignments ordered by pre-clone index.
    pub fn read_assigned_alignments(&self) -> Result<RecordStream<VdjcAlignment>> {
        RecordStream::open(
            &self.path,
            self.assigned_offset,
            self.number_of_assigned_alignments,
            stop_at(ALIGNMENTS_END),
        )
    }

    /// Unassigned alignments followed by the assigned ones.
    pub fn read_alignments(&self) -> Result<RecordStream<VdjcAlignment>> {
        RecordStream::open(
            &self.path,
            self.alignments_offset,
            self.number_of_alignments,
            |header: &BlockHeader| match header.special_byte(0) {
                UNASSIGNED_END => HeaderAction::Skip,
                ALIGNMENTS_END => HeaderAction::Stop,
                _ => HeaderAction::Fail,
            },
        )
    }

    pub fn read_pre_clones(&self) -> Result<RecordStream<PreClone>> {
        RecordStream::open(
            &self.path,
            self.clones_offset,
            self.number_of_clones,
            stop_at(CLONES_END),
        )
    }
}

impl PreCloneReader for FilePreCloneReader {
    type PreClones = RecordStream<PreClone>;
    type Alignments = RecordStream<VdjcAlignment>;

    fn read_pre_clones(&self) -> Result<RecordStream<PreClone>> {
        FilePreCloneReader::read_pre_clones(self)
    }

    fn read_alignments(&self) -> Result<RecordStream<VdjcAlignment>> {
        FilePreCloneReader::read_alignments(self)
    }

    fn total_number_of_reads(&self) -> u64 {
        self.header.number_of_reads
    }
}

/// Pre-clones of an alignment source without any assembly: every alignment covering
/// all assembling features becomes a pre-clone of its own.
pub struct PreClonesFromAlignments<S> {
    source: S,
    assembling_features: Vec<GeneFeature>,
    // handed over to the first pre-clone pass only
    listener: Cell<Option<Box<dyn ClonalSequenceExtractionListener + Send>>>,
}

impl<S: AlignmentSource> PreClonesFromAlignments<S> {
    pub fn new(source: S, assembling_features: &[GeneFeature]) -> Self {
        PreClonesFromAlignments {
            source,
            assembling_features: assembling_features.to_vec(),
            listener: Cell::new(None),
        }
    }

    pub fn with_extraction_listener(
        self,
        listener: impl ClonalSequenceExtractionListener + Send + 'static,
    ) -> Self {
        self.listener.set(Some(Box::new(listener)));
        self
    }
}

impl<S: AlignmentSource> PreCloneReader for PreClonesFromAlignments<S> {
    type PreClones = SingletonPreClones<S::Cursor>;
    type Alignments = SingletonAlignments<S::Cursor>;

    fn read_pre_clones(&self) -> Result<Self::PreClones> {
        Ok(SingletonPreClones {
            cursor: self.source.cursor()?,
            assembling_features: self.assembling_features.clone(),
            next_index: 0,
            listener: self.listener.take(),
        })
    }

    fn read_alignments(&self) -> Result<Self::Alignments> {
        Ok(SingletonAlignments {
            cursor: self.source.cursor()?,
            assembling_features: self.assembling_features.clone(),
            next_index: 0,
        })
    }

    fn total_number_of_reads(&self) -> u64 {
        self.source.metadata().number_of_reads
    }
}

pub struct SingletonPreClones<C> {
    cursor: C,
    assembling_features: Vec<GeneFeature>,
    next_index: i64,
    listener: Option<Box<dyn ClonalSequenceExtractionListener + Send>>,
}

impl<C: AlignmentCursor> Iterator for SingletonPreClones<C> {
    type Item = Result<PreClone>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let al = match self.cursor.next()? {
                Ok(al) => al,
                Err(err) => return Some(Err(err)),
            };
            match PreClone::from_alignment(self.next_index, &al, &self.assembling_features) {
                Some(clone) => {
                    self.next_index += 1;
                    return Some(Ok(clone));
                }
                None => {
                    if let Some(listener) = self.listener.as_mut() {
                        listener.on_failed_to_extract(&al);
                    }
                }
            }
        }
    }
}

pub struct SingletonAlignments<C> {
    cursor: C,
    assembling_features: Vec<GeneFeature>,
    next_index: i64,
}

impl<C: AlignmentCursor> Iterator for SingletonAlignments<C> {
    type Item = Result<VdjcAlignment>;

    fn next(&mut self) -> Option<Self::Item> {
        let al = match self.cursor.next()? {
            Ok(al) => al,
            Err(err) => return Some(Err(err)),
        };
        if !self
            .assembling_features
            .iter()
            .all(|&f| al.feature(f).is_some())
        {
            return Some(Ok(al));
        }
        let al = al.with_clone_index_and_mapping_type(self.next_index, 0);
        self.next_index += 1;
        Some(Ok(al))
    }
}
