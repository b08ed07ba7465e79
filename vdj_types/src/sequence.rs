use serde::{Deserialize, Serialize};
use std::fmt;

/// Nucleotide sequence with one phred quality byte per base.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SequenceWithQuality {
    sequence: Vec<u8>,
    quality: Vec<u8>,
}

impl SequenceWithQuality {
    /// Panics if the sequence and quality lengths differ.
    pub fn new(sequence: &[u8], quality: &[u8]) -> Self {
        assert_eq!(
            sequence.len(),
            quality.len(),
            "sequence and quality lengths differ"
        );
        SequenceWithQuality {
            sequence: sequence.to_vec(),
            quality: quality.to_vec(),
        }
    }

    /// Sequence where every base has the same quality.
    pub fn with_uniform_quality(sequence: &[u8], quality: u8) -> Self {
        SequenceWithQuality {
            sequence: sequence.to_vec(),
            quality: vec![quality; sequence.len()],
        }
    }

    pub fn sequence(&self) -> &[u8] {
        &self.sequence
    }

    pub fn quality(&self) -> &[u8] {
        &self.quality
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }
}

impl fmt::Display for SequenceWithQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.sequence))
    }
}
