use crate::source::SourceMetadata;
use vdj_types::{
    GeneFeature, GeneType, SequenceWithQuality, TagCount, TagInfo, TagTuple, TagType, TagsInfo,
    VdjcAlignment, VdjcHit,
};

pub fn tt(values: &[&str]) -> TagTuple {
    values.iter().copied().collect()
}

/// Metadata of a container tagged with `CELL` and `UMI`, sorted by both.
pub fn cell_umi_metadata() -> SourceMetadata {
    SourceMetadata {
        tags_info: TagsInfo::new(
            2,
            vec![
                TagInfo {
                    name: "CELL".to_string(),
                    tag_type: TagType::Cell,
                },
                TagInfo {
                    name: "UMI".to_string(),
                    tag_type: TagType::Molecule,
                },
            ],
        ),
        number_of_reads: 100,
        ..SourceMetadata::default()
    }
}

pub struct AlignmentBuilder {
    al: VdjcAlignment,
    hits: [Vec<VdjcHit>; 4],
}

impl AlignmentBuilder {
    pub fn new(id: u64, tags: &[&str]) -> Self {
        AlignmentBuilder {
            al: VdjcAlignment::new(id, TagCount::singleton(tt(tags))),
            hits: Default::default(),
        }
    }

    pub fn cdr3(mut self, seq: &[u8]) -> Self {
        self.al = self.al.feature_sequence(
            GeneFeature::CDR3,
            SequenceWithQuality::with_uniform_quality(seq, 30),
        );
        self
    }

    pub fn v(mut self, gene: &str, score: f32) -> Self {
        self.hits[GeneType::Variable.index()].push(VdjcHit::new(gene, score));
        self
    }

    pub fn j(mut self, gene: &str, score: f32) -> Self {
        self.hits[GeneType::Joining.index()].push(VdjcHit::new(gene, score));
        self
    }

    pub fn reads(mut self, n: u64) -> Self {
        let min_read_id = self.al.min_read_id();
        self.al = self.al.reads(min_read_id, n);
        self
    }

    pub fn build(self) -> VdjcAlignment {
        let mut al = self.al;
        for (gt, hits) in GeneType::all().into_iter().zip(self.hits) {
            if !hits.is_empty() {
                al = al.hits_for(gt, hits);
            }
        }
        al
    }
}
