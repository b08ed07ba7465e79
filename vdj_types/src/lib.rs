//! vdj_types
// Copyright (c) 2021 10x Genomics, Inc. All rights reserved.
#![expect(missing_docs)]

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

// From https://danielkeep.github.io/tlborm/book/blk-counting.html
macro_rules! replace_expr {
    ($_t:tt $sub:expr) => {
        $sub
    };
}

macro_rules! count_tts {
    ($($tts:tt)*) => {0usize $(+ replace_expr!($tts 1usize))*};
}

macro_rules! make_enum {
    (
        name: $name:ident,
        variants:[$( ($field:ident, $lit: literal) ,)*],
        const_var_name: $const_var_name:ident,
    ) => {
        pub const $const_var_name: [&str; count_tts!($($field)*)] = [
            $($lit,)*
        ];

        #[derive(
            Debug,
            Copy,
            Clone,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Serialize,
            Deserialize,
            Hash,
        )]
        pub enum $name {
            $(
                #[serde(rename = $lit)]
                $field,
            )*
        }

        impl $name {
            pub fn all() -> [Self; count_tts!($($field)*)] {
                [
                    $($name::$field,)*
                ]
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", match self {
                    $(
                        $name::$field => $lit,
                    )*
                })
            }
        }

        impl From<$name> for &'static str {
            fn from(src: $name) -> &'static str {
                match src {
                    $(
                        $name::$field => $lit,
                    )*
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $(
                        $lit => Ok($name::$field),
                    )*
                    unknown => Err(
                        format!("Unknown variant '{}' for {}. Supported variants are: [{}]", unknown, stringify!($name), $const_var_name.join(", "))
                    )
                }
            }
        }
    };
}

// Modules below use make_enum!, so they are declared after it.
pub mod alignment;
pub mod parameters;
pub mod sequence;
pub mod tags;

pub use alignment::{VdjcAlignment, VdjcHit, UNASSIGNED};
pub use parameters::{AlignerParameters, HasRelativeMinScore};
pub use sequence::SequenceWithQuality;
pub use tags::{TagCount, TagCountAggregator, TagInfo, TagTuple, TagType, TagValue, TagsInfo};

make_enum! {
    name: GeneType,
    variants: [
        (Variable, "V"),
        (Diversity, "D"),
        (Joining, "J"),
        (Constant, "C"),
    ],
    const_var_name: GENE_TYPES,
}

impl GeneType {
    /// Gene types carrying alignment information used for gene assignment.
    pub const VJC_REFERENCE: [GeneType; 3] =
        [GeneType::Variable, GeneType::Joining, GeneType::Constant];

    /// Gene types used for empirical clonotype assignment.
    pub const VJ_REFERENCE: [GeneType; 2] = [GeneType::Variable, GeneType::Joining];

    /// Position of this gene type in per-gene-type arrays.
    pub fn index(self) -> usize {
        self as usize
    }
}

make_enum! {
    name: GeneFeature,
    variants: [
        (FR1, "FR1"),
        (CDR1, "CDR1"),
        (FR2, "FR2"),
        (CDR2, "CDR2"),
        (FR3, "FR3"),
        (CDR3, "CDR3"),
        (FR4, "FR4"),
        (VJJunction, "VJJunction"),
        (VDJRegion, "VDJRegion"),
    ],
    const_var_name: GENE_FEATURES,
}

/// Name of a reference gene, e.g. `TRBV12-3*00`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeneId(String);

impl GeneId {
    pub fn new(name: impl Into<String>) -> Self {
        GeneId(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GeneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GeneId {
    fn from(src: &str) -> Self {
        GeneId::new(src)
    }
}

/// One entry of the gene reference table stored in file headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneReference {
    pub id: GeneId,
    pub gene_type: GeneType,
}

/// A gene together with its (aggregated) alignment score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneAndScore {
    pub gene: GeneId,
    pub score: f32,
}

impl GeneAndScore {
    pub fn new(gene: GeneId, score: f32) -> Self {
        GeneAndScore { gene, score }
    }
}

impl Eq for GeneAndScore {}

/// Best score first, ties broken by gene name.
impl Ord for GeneAndScore {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| self.gene.cmp(&other.gene))
    }
}

impl PartialOrd for GeneAndScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
