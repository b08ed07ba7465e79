// Copyright (c) 2021 10x Genomics, Inc. All rights reserved.

//!
//! Block oriented storage of serde records.
//!
//! A file is a sequence of raw values (written with [`BlockOutput::write_raw`]) followed
//! by blocks. Every block starts with a fixed size [`BlockHeader`]:
//! ```text
//! +--------+-----------------+-------------+----------------+------------+
//! | Kind   | Special bytes   | Num records | Compressed len | Raw len    |
//! | [1]    | [4]             | [4]         | [4]            | [4]        |
//! +--------+-----------------+-------------+----------------+------------+
//! ```
//! All integers are stored in **Big endian** order. A data block (kind 0) is followed by
//! `Compressed len` bytes holding the lz4 compressed concatenation of `Num records`
//! bincode encoded records. A special block (kind 1) has no payload; its first special
//! byte is used as a section marker.
//!
//! Readers ([`BlockStream`]) start at an arbitrary block offset and decide for every
//! special block whether to stop, skip it or fail.
#![expect(missing_docs)]

mod header;
mod output;
mod stream;

pub use header::BlockHeader;
pub use output::{BlockOutput, CountingWriter};
pub use stream::{read_footer, read_raw, BlockStream, HeaderAction};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Bincode(#[from] bincode::Error),

    #[error("Unexpected marker {found} in block header at offset {offset}")]
    UnexpectedMarker { found: u8, offset: u64 },

    #[error("Stream ended at offset {offset} before the closing marker")]
    Truncated { offset: u64 },

    #[error("Invalid block header at offset {offset}: kind byte {kind}")]
    InvalidHeader { kind: u8, offset: u64 },

    #[error("Block at offset {offset} holds {expected} records, decoded {got}")]
    CorruptBlock {
        offset: u64,
        expected: u32,
        got: u32,
    },

    #[error("Unsupported file format: expected version {expected:?}, found {found:?}")]
    UnsupportedFormat { expected: String, found: String },

    #[error("Invalid footer: {0}")]
    InvalidFooter(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use pretty_assertions::assert_eq;
    use serde::{Deserialize, Serialize};
    use std::fs::File;
    use std::path::Path;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        id: u64,
        name: String,
    }

    fn items(range: std::ops::Range<u64>) -> Vec<Item> {
        range
            .map(|id| Item {
                id,
                name: format!("item{id}"),
            })
            .collect()
    }

    /// Header, two sections ended by markers 1 and 2, then a footer.
    fn write_sections(path: &Path) -> Result<(u64, u64)> {
        let mut out = BlockOutput::new(File::create(path)?, 3);
        out.write_raw(&"header".to_string())?;
        let first = out.position()?;
        for item in items(0..7) {
            out.write_record(&item)?;
        }
        out.write_marker(BlockHeader::special(1))?;
        let second = out.position()?;
        for item in items(7..12) {
            out.write_record(&item)?;
        }
        out.write_marker(BlockHeader::special(2))?;
        out.write_u64(first)?;
        out.write_u64(second)?;
        out.finish()?;
        Ok((first, second))
    }

    fn stop_on(marker: u8) -> impl FnMut(&BlockHeader) -> HeaderAction + Send {
        move |header: &BlockHeader| {
            if header.special_byte(0) == marker {
                HeaderAction::Stop
            } else {
                HeaderAction::Fail
            }
        }
    }

    #[test]
    fn test_stop_on_marker() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("sections.bin");
        let (first, second) = write_sections(&path)?;

        let read: Vec<Item> =
            BlockStream::open(&path, first, stop_on(1))?.collect::<Result<_, _>>()?;
        assert_eq!(read, items(0..7));

        let read: Vec<Item> =
            BlockStream::open(&path, second, stop_on(2))?.collect::<Result<_, _>>()?;
        assert_eq!(read, items(7..12));
        Ok(())
    }

    #[test]
    fn test_skip_marker() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("sections.bin");
        let (first, _) = write_sections(&path)?;

        let mut stream = BlockStream::open(&path, first, |header: &BlockHeader| {
            match header.special_byte(0) {
                1 => HeaderAction::Skip,
                2 => HeaderAction::Stop,
                _ => HeaderAction::Fail,
            }
        })?;
        let read: Vec<Item> = stream.by_ref().collect::<Result<_, _>>()?;
        assert_eq!(read, items(0..12));
        assert_eq!(stream.records_read(), 12);
        Ok(())
    }

    #[test]
    fn test_unexpected_marker() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("sections.bin");
        let (first, _) = write_sections(&path)?;

        let result: Result<Vec<Item>, Error> =
            BlockStream::open(&path, first, stop_on(2))?.collect();
        match result {
            Err(Error::UnexpectedMarker { found, .. }) => assert_eq!(found, 1),
            other => panic!("expected unexpected marker error, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_truncated_stream() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("open.bin");
        let mut out = BlockOutput::new(File::create(&path)?, 4);
        for item in items(0..5) {
            out.write_record(&item)?;
        }
        out.finish()?;

        let mut stream = BlockStream::<Item>::open(&path, 0, stop_on(1))?;
        let read: Vec<_> = stream.by_ref().take(5).collect::<Result<_, _>>()?;
        assert_eq!(read, items(0..5));
        assert!(matches!(stream.next(), Some(Err(Error::Truncated { .. }))));
        assert!(stream.next().is_none());
        Ok(())
    }

    #[test]
    fn test_raw_values_and_footer() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("sections.bin");
        let (first, second) = write_sections(&path)?;

        let mut reader = std::io::BufReader::new(File::open(&path)?);
        let header: String = read_raw(&mut reader)?;
        assert_eq!(header, "header");
        assert_eq!(read_footer(&path, 2)?, vec![first, second]);
        Ok(())
    }
}
