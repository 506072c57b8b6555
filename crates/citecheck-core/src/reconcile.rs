//! Merging inline-citation matches into their parent references.
//!
//! The backend returns inline citations in one of two shapes: a flat list
//! where each entry points at a reference by `matched_ref_index`, or already
//! nested under each reference's `inline_citations`. [`reconcile`] produces a
//! single organized reference list plus match statistics from either shape.
//!
//! Output depends only on the inputs, so results are safe to memoize.

use serde::{Deserialize, Serialize};

use crate::models::{InlineCitationResult, MatchStatus, ReferenceResult};

/// Shape of the inline-citation data handed to [`reconcile`].
#[derive(Debug, Clone, PartialEq)]
pub enum InlineInput<'a> {
    /// Flat list to be bucketed by `matched_ref_index`.
    Flat(&'a [InlineCitationResult]),
    /// References already carry their own `inline_citations`.
    PreNested,
    /// No inline-citation data.
    None,
}

impl<'a> InlineInput<'a> {
    /// Pick the input shape from a raw backend payload.
    ///
    /// A non-empty flat list wins; otherwise any reference carrying a
    /// non-empty nested array means the backend pre-merged.
    pub fn infer(
        inline_results: Option<&'a [InlineCitationResult]>,
        references: Option<&[ReferenceResult]>,
    ) -> Self {
        match inline_results {
            Some(flat) if !flat.is_empty() => Self::Flat(flat),
            _ if has_nested(references) => Self::PreNested,
            _ => Self::None,
        }
    }
}

/// Match statistics across all inline citations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineStats {
    pub total_inline: usize,
    pub matched: usize,
    pub mismatched: usize,
    pub ambiguous: usize,
    pub orphaned: usize,
}

impl InlineStats {
    fn tally<'a>(
        citations: impl IntoIterator<Item = &'a InlineCitationResult>,
        orphans: Option<&[InlineCitationResult]>,
    ) -> Self {
        let mut stats = Self {
            orphaned: orphans.map_or(0, <[_]>::len),
            ..Self::default()
        };
        for citation in citations {
            stats.total_inline += 1;
            match citation.match_status {
                MatchStatus::Matched => stats.matched += 1,
                MatchStatus::Mismatch => stats.mismatched += 1,
                MatchStatus::Ambiguous => stats.ambiguous += 1,
                MatchStatus::Orphan => {}
            }
        }
        stats
    }
}

/// Organized references with inline citations attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconciliation {
    pub organized: Vec<ReferenceResult>,
    pub has_inline: bool,
    pub stats: Option<InlineStats>,
}

fn has_nested(references: Option<&[ReferenceResult]>) -> bool {
    references.is_some_and(|refs| refs.iter().any(|r| r.nested_inline_count() > 0))
}

/// Merge inline-citation results into the reference list.
///
/// - `Flat`: each reference at index `i` receives exactly the entries whose
///   `matched_ref_index == i`, in list order. `total_inline` is the flat
///   list's length, so an entry pointing outside the list is counted but
///   lands in no bucket.
/// - `PreNested`, or an empty flat list while references carry nested
///   arrays: references are returned unchanged and statistics are summed
///   over the nested arrays.
/// - Otherwise (`None`, or nothing nested): references unchanged,
///   `has_inline == false`, no statistics.
///
/// A missing reference list yields an empty `organized` list.
pub fn reconcile(
    references: Option<&[ReferenceResult]>,
    inline: InlineInput<'_>,
    orphans: Option<&[InlineCitationResult]>,
) -> Reconciliation {
    let refs = references.unwrap_or_default();

    match inline {
        InlineInput::Flat(flat) if !flat.is_empty() => {
            let organized = refs
                .iter()
                .enumerate()
                .map(|(i, reference)| {
                    let bucket: Vec<InlineCitationResult> = flat
                        .iter()
                        .filter(|c| c.matched_ref_index == Some(i as i64))
                        .cloned()
                        .collect();
                    ReferenceResult {
                        inline_citations: Some(bucket),
                        ..reference.clone()
                    }
                })
                .collect();

            let unplaced = flat
                .iter()
                .filter(|c| {
                    c.matched_ref_index
                        .is_some_and(|idx| idx < 0 || idx as usize >= refs.len())
                })
                .count();
            if unplaced > 0 {
                tracing::debug!(
                    unplaced,
                    reference_count = refs.len(),
                    "Inline citations reference an index outside the reference list"
                );
            }

            Reconciliation {
                organized,
                has_inline: true,
                stats: Some(InlineStats::tally(flat, orphans)),
            }
        }
        InlineInput::PreNested | InlineInput::Flat(_) if has_nested(references) => {
            let nested = refs
                .iter()
                .flat_map(|r| r.inline_citations.iter().flatten());
            Reconciliation {
                organized: refs.to_vec(),
                has_inline: true,
                stats: Some(InlineStats::tally(nested, orphans)),
            }
        }
        _ => Reconciliation {
            organized: refs.to_vec(),
            has_inline: false,
            stats: None,
        },
    }
}
