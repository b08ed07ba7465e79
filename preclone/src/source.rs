//! Re-readable alignment containers.

use crate::progress::ProgressCounter;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use vdj_types::{AlignerParameters, GeneReference, TagsInfo, VdjcAlignment};

/// Upstream metadata of an alignment container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub aligner_parameters: AlignerParameters,
    pub tags_info: TagsInfo,
    pub used_genes: Vec<GeneReference>,
    pub number_of_reads: u64,
}

/// A forward pass over the alignments of a source.
pub trait AlignmentCursor: Iterator<Item = Result<VdjcAlignment>> {
    /// Handle reporting how far this cursor has advanced.
    fn progress(&self) -> ProgressCounter;
}

/// A container of alignments sorted by tags that can be traversed any number of times,
/// every traversal yielding the same records in the same order.
pub trait AlignmentSource {
    type Cursor: AlignmentCursor;

    fn metadata(&self) -> &SourceMetadata;

    fn number_of_alignments(&self) -> u64;

    /// Open an independent cursor positioned at the first alignment.
    fn cursor(&self) -> Result<Self::Cursor>;
}

/// In-memory [`AlignmentSource`].
#[derive(Debug, Clone)]
pub struct AlignmentArena {
    metadata: SourceMetadata,
    alignments: Arc<Vec<VdjcAlignment>>,
}

impl AlignmentArena {
    pub fn new(metadata: SourceMetadata, alignments: Vec<VdjcAlignment>) -> Self {
        AlignmentArena {
            metadata,
            alignments: Arc::new(alignments),
        }
    }
}

impl AlignmentSource for AlignmentArena {
    type Cursor = ArenaCursor;

    fn metadata(&self) -> &SourceMetadata {
        &self.metadata
    }

    fn number_of_alignments(&self) -> u64 {
        self.alignments.len() as u64
    }

    fn cursor(&self) -> Result<ArenaCursor> {
        Ok(ArenaCursor {
            alignments: Arc::clone(&self.alignments),
            position: 0,
            progress: ProgressCounter::new(self.alignments.len() as u64),
        })
    }
}

pub struct ArenaCursor {
    alignments: Arc<Vec<VdjcAlignment>>,
    position: usize,
    progress: ProgressCounter,
}

impl Iterator for ArenaCursor {
    type Item = Result<VdjcAlignment>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.alignments.get(self.position) {
            Some(al) => {
                self.position += 1;
                self.progress.inc();
                Some(Ok(al.clone()))
            }
            None => {
                self.progress.finish();
                None
            }
        }
    }
}

impl AlignmentCursor for ArenaCursor {
    fn progress(&self) -> ProgressCounter {
        self.progress.clone()
    }
}
