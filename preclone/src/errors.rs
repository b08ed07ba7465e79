use vdj_types::TagType;

#[derive(Debug, thiserror::Error)]
pub enum PreCloneError {
    #[error(
        "Inconsistent sequences of clones and alignments (alignments checksum: \
         {alignments_checksum}, clones checksum: {clones_checksum})"
    )]
    InconsistentClones {
        alignments_checksum: i64,
        clones_checksum: i64,
    },

    #[error(
        "Input has insufficient sorting level: sorted by {sorting_level} tag(s), grouping by \
         {grouping} requires {required}"
    )]
    InsufficientSorting {
        sorting_level: usize,
        required: usize,
        grouping: TagType,
    },

    #[error("Input has no tags of the {0} level")]
    UnknownGroupingLevel(TagType),

    #[error("Alignment groups are not synchronized between passes: {0}")]
    DesynchronizedGroups(String),

    #[error("Alignment {alignment_id} carries tags with different keys at depth {depth}")]
    AggregatedTagCount { alignment_id: u64, depth: usize },

    #[error("Writer is not initialized")]
    NotInitialized,

    #[error("Writer is already initialized")]
    AlreadyInitialized,

    #[error("The {stage} sort stage failed: {message}")]
    SortStageFailed { stage: &'static str, message: String },
}
