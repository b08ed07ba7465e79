use crate::{BlockHeader, Error};
use byteorder::{BigEndian, WriteBytesExt};
use serde::Serialize;
use std::io::{self, Write};

/// Counts the bytes passed to the inner writer.
pub struct CountingWriter<W: Write> {
    inner: W,
    count: u64,
}

impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        CountingWriter { inner, count: 0 }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Writes raw values and compressed record blocks to `W`.
///
/// Records are buffered into a pending block that is compressed and written every
/// `records_per_block` records, before a marker, and on [`BlockOutput::finish`].
pub struct BlockOutput<W: Write> {
    writer: CountingWriter<io::BufWriter<W>>,
    records_per_block: usize,
    // bincode encoded records of the pending block
    pending: Vec<u8>,
    pending_records: usize,
}

impl<W: Write> BlockOutput<W> {
    pub fn new(writer: W, records_per_block: usize) -> Self {
        BlockOutput {
            writer: CountingWriter::new(io::BufWriter::new(writer)),
            records_per_block: records_per_block.max(1),
            pending: Vec::new(),
            pending_records: 0,
        }
    }

    /// Write a bincode encoded value outside of any block. Pending records are flushed first.
    pub fn write_raw<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), Error> {
        self.flush_block()?;
        bincode::serialize_into(&mut self.writer, value)?;
        Ok(())
    }

    /// Write a big endian `u64` outside of any block. Pending records are flushed first.
    pub fn write_u64(&mut self, value: u64) -> Result<(), Error> {
        self.flush_block()?;
        self.writer.write_u64::<BigEndian>(value)?;
        Ok(())
    }

    pub fn write_record<T: Serialize>(&mut self, record: &T) -> Result<(), Error> {
        bincode::serialize_into(&mut self.pending, record)?;
        self.pending_records += 1;
        if self.pending_records >= self.records_per_block {
            self.flush_block()?;
        }
        Ok(())
    }

    /// Compress and write the pending records as one data block. No-op if nothing is pending.
    pub fn flush_block(&mut self) -> Result<(), Error> {
        if self.pending_records == 0 {
            return Ok(());
        }
        let compressed = lz4::block::compress(&self.pending, None, false)?;
        BlockHeader::data(
            self.pending_records as u32,
            compressed.len() as u32,
            self.pending.len() as u32,
        )
        .write_to(&mut self.writer)?;
        self.writer.write_all(&compressed)?;
        self.pending.clear();
        self.pending_records = 0;
        Ok(())
    }

    /// Flush pending records, then write a special block.
    pub fn write_marker(&mut self, header: BlockHeader) -> Result<(), Error> {
        self.flush_block()?;
        header.write_to(&mut self.writer)?;
        Ok(())
    }

    /// Offset at which the next block will start. Pending records are flushed first.
    pub fn position(&mut self) -> Result<u64, Error> {
        self.flush_block()?;
        Ok(self.writer.count())
    }

    /// Flush everything and return the inner writer.
    pub fn finish(mut self) -> Result<W, Error> {
        self.flush_block()?;
        self.writer.flush()?;
        self.writer
            .into_inner()
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))
    }
}
