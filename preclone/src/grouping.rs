use crate::errors::PreCloneError;
use anyhow::Result;
use vdj_types::{TagTuple, VdjcAlignment};

/// Consecutive alignments sharing the same tag prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentGroup {
    pub key: TagTuple,
    pub alignments: Vec<VdjcAlignment>,
}

/// Key of `al` at grouping `depth`. Alignments carrying several keys can not be grouped.
pub fn group_key(al: &VdjcAlignment, depth: usize) -> Result<TagTuple> {
    if depth == 0 {
        return Ok(TagTuple::NO_TAGS);
    }
    al.tag_count().as_key_prefix(depth).ok_or_else(|| {
        PreCloneError::AggregatedTagCount {
            alignment_id: al.alignment_id(),
            depth,
        }
        .into()
    })
}

/// Splits a stream of alignments sorted by tags into groups of equal key.
pub struct AlignmentGroups<I> {
    inner: I,
    depth: usize,
    peeked: Option<(TagTuple, VdjcAlignment)>,
}

impl<I> AlignmentGroups<I>
where
    I: Iterator<Item = Result<VdjcAlignment>>,
{
    pub fn new(inner: I, depth: usize) -> Self {
        AlignmentGroups {
            inner,
            depth,
            peeked: None,
        }
    }

    fn pull(&mut self) -> Result<Option<(TagTuple, VdjcAlignment)>> {
        if let Some(peeked) = self.peeked.take() {
            return Ok(Some(peeked));
        }
        match self.inner.next().transpose()? {
            Some(al) => Ok(Some((group_key(&al, self.depth)?, al))),
            None => Ok(None),
        }
    }

    fn next_group(&mut self) -> Result<Option<AlignmentGroup>> {
        let Some((key, first)) = self.pull()? else {
            return Ok(None);
        };
        let mut alignments = vec![first];
        while let Some((next_key, al)) = self.pull()? {
            if next_key != key {
                self.peeked = Some((next_key, al));
                break;
            }
            alignments.push(al);
        }
        Ok(Some(AlignmentGroup { key, alignments }))
    }
}

impl<I> Iterator for AlignmentGroups<I>
where
    I: Iterator<Item = Result<VdjcAlignment>>,
{
    type Item = Result<AlignmentGroup>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_group().transpose()
    }
}
