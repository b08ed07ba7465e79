use crate::Error;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

const KIND_DATA: u8 = 0;
const KIND_SPECIAL: u8 = 1;

/// Header preceding every block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    kind: u8,
    special: [u8; 4],
    num_records: u32,
    compressed_len: u32,
    raw_len: u32,
}

impl BlockHeader {
    /// Serialized size in bytes.
    pub const SIZE: usize = 17;

    pub fn data(num_records: u32, compressed_len: u32, raw_len: u32) -> Self {
        BlockHeader {
            kind: KIND_DATA,
            special: [0; 4],
            num_records,
            compressed_len,
            raw_len,
        }
    }

    /// A payload-less block carrying `marker` as its first special byte.
    pub fn special(marker: u8) -> Self {
        BlockHeader {
            kind: KIND_SPECIAL,
            special: [marker, 0, 0, 0],
            num_records: 0,
            compressed_len: 0,
            raw_len: 0,
        }
    }

    pub fn is_special(&self) -> bool {
        self.kind == KIND_SPECIAL
    }

    pub fn special_byte(&self, i: usize) -> u8 {
        self.special[i]
    }

    pub fn num_records(&self) -> u32 {
        self.num_records
    }

    pub fn compressed_len(&self) -> u32 {
        self.compressed_len
    }

    pub fn raw_len(&self) -> u32 {
        self.raw_len
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u8(self.kind)?;
        writer.write_all(&self.special)?;
        writer.write_u32::<BigEndian>(self.num_records)?;
        writer.write_u32::<BigEndian>(self.compressed_len)?;
        writer.write_u32::<BigEndian>(self.raw_len)
    }

    /// Read the header starting at `offset`. Returns `Ok(None)` on a clean end of file.
    pub fn read_from<R: Read>(reader: &mut R, offset: u64) -> Result<Option<Self>, Error> {
        let mut buf = [0u8; Self::SIZE];
        let mut filled = 0;
        while filled < Self::SIZE {
            match reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        if filled == 0 {
            return Ok(None);
        }
        if filled < Self::SIZE {
            return Err(Error::Truncated { offset });
        }

        let mut rest = &buf[5..];
        let header = BlockHeader {
            kind: buf[0],
            special: [buf[1], buf[2], buf[3], buf[4]],
            num_records: rest.read_u32::<BigEndian>()?,
            compressed_len: rest.read_u32::<BigEndian>()?,
            raw_len: rest.read_u32::<BigEndian>()?,
        };
        if header.kind != KIND_DATA && header.kind != KIND_SPECIAL {
            return Err(Error::InvalidHeader {
                kind: header.kind,
                offset,
            });
        }
        Ok(Some(header))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let mut buf = Vec::new();
        BlockHeader::data(3, 258, 1024).write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), BlockHeader::SIZE);
        assert_eq!(
            buf,
            vec![0, 0, 0, 0, 0, 0, 0, 0, 3, 0, 0, 1, 2, 0, 0, 4, 0]
        );

        let header = BlockHeader::read_from(&mut buf.as_slice(), 0)
            .unwrap()
            .unwrap();
        assert!(!header.is_special());
        assert_eq!(header.num_records(), 3);
        assert_eq!(header.compressed_len(), 258);
        assert_eq!(header.raw_len(), 1024);
    }

    #[test]
    fn test_special_header() {
        let mut buf = Vec::new();
        BlockHeader::special(2).write_to(&mut buf).unwrap();
        let header = BlockHeader::read_from(&mut buf.as_slice(), 0)
            .unwrap()
            .unwrap();
        assert!(header.is_special());
        assert_eq!(header.special_byte(0), 2);
    }

    #[test]
    fn test_partial_header() {
        let empty: &[u8] = &[];
        assert!(BlockHeader::read_from(&mut &empty[..], 0).unwrap().is_none());
        let partial: &[u8] = &[0, 0, 0];
        assert!(matches!(
            BlockHeader::read_from(&mut &partial[..], 40),
            Err(Error::Truncated { offset: 40 })
        ));
        let bad_kind = [7u8; BlockHeader::SIZE];
        assert!(matches!(
            BlockHeader::read_from(&mut &bad_kind[..], 0),
            Err(Error::InvalidHeader { kind: 7, .. })
        ));
    }
}
