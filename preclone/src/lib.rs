// Copyright (c) 2021 10x Genomics, Inc. All rights reserved.

//! Pre-clone assembly.
//!
//! Alignments grouped by a barcode prefix (cell or molecule) are collapsed into
//! pre-clones: one consensus per distinct clonal sequence inside a group, with the
//! alignments lacking the assembling features attached empirically through their genes
//! and tag suffixes. The result is stored in a single file holding the unassigned
//! alignments, the alignments sorted by pre-clone and the pre-clones themselves.
#![expect(missing_docs)]

pub mod assembler;
pub mod consensus;
pub mod errors;
pub mod gene_accumulator;
pub mod grouping;
pub mod parameters;
pub mod pre_clone;
pub mod progress;
pub mod reader;
pub mod report;
pub mod runner;
pub mod sort_stage;
pub mod source;
pub mod writer;

pub use assembler::{PreCloneAssembler, PreCloneAssemblerResult};
pub use errors::PreCloneError;
pub use parameters::{PreCloneAssemblerParameters, PreCloneConfig, WriterParameters};
pub use pre_clone::PreClone;
pub use reader::{FilePreCloneReader, PreCloneReader};
pub use report::PreCloneAssemblerReport;
pub use runner::PreCloneAssemblerRunner;
pub use writer::{FilePreCloneWriter, PreCloneFileHeader};

#[cfg(test)]
pub(crate) mod test_utils;
