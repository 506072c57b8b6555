//! Paywall and reveal gating for validation results.
//!
//! Visibility is decided from backend-owned state (the partial status and the
//! `results_gated` flag). The client never recomputes tier or usage rules.

use serde::{Deserialize, Serialize};

use crate::models::{Job, ReferenceResult};

/// How much of the result set the user may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityMode {
    FullyRevealed,
    /// Results are held back until the user clicks reveal.
    GatedPendingReveal,
    /// Only part of the batch was validated; the rest needs an upgrade.
    PartialAwaitingUpgrade,
}

/// Inputs to [`evaluate`].
#[derive(Debug, Clone, Copy)]
pub struct GatingInput<'a> {
    /// Results currently present.
    pub results: &'a [ReferenceResult],
    pub is_partial: bool,
    pub total_submitted: usize,
    /// Number of results currently visible.
    pub processed_count: usize,
    /// Backend requested a reveal step before showing results.
    pub results_gated: bool,
    /// The user already performed the reveal action.
    pub revealed: bool,
}

impl<'a> GatingInput<'a> {
    /// Gating inputs for a tracked job.
    pub fn from_job(job: &'a Job, revealed: bool) -> Self {
        Self {
            results: &job.results,
            is_partial: job.is_partial(),
            total_submitted: job.submitted_count,
            processed_count: job.processed_count,
            results_gated: job.results_gated,
            revealed,
        }
    }
}

/// Counts and visibility mode for the current result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatingSummary {
    pub citations_remaining: usize,
    /// Results with no errors.
    pub perfect: usize,
    pub need_fixes: usize,
    pub is_partial: bool,
    pub mode: VisibilityMode,
}

/// Pick the visibility mode.
///
/// A partial job always awaits upgrade; otherwise a gated result set stays
/// hidden until revealed.
pub fn visibility(is_partial: bool, results_gated: bool, revealed: bool) -> VisibilityMode {
    if is_partial {
        VisibilityMode::PartialAwaitingUpgrade
    } else if results_gated && !revealed {
        VisibilityMode::GatedPendingReveal
    } else {
        VisibilityMode::FullyRevealed
    }
}

/// Compute counts and visibility.
///
/// Counts reflect only the results currently present, never the full
/// submitted total of a partial job.
pub fn evaluate(input: &GatingInput<'_>) -> GatingSummary {
    let perfect = input.results.iter().filter(|r| r.is_perfect()).count();
    GatingSummary {
        citations_remaining: input.total_submitted.saturating_sub(input.processed_count),
        perfect,
        need_fixes: input.results.len() - perfect,
        is_partial: input.is_partial,
        mode: visibility(input.is_partial, input.results_gated, input.revealed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CitationError, JobResults, JobStatus, JobStatusResponse};

    fn result(n: u32, error_count: usize) -> ReferenceResult {
        let errors = (0..error_count)
            .map(|i| CitationError {
                component: Some("author".to_string()),
                problem: format!("problem {i}"),
                correction: None,
            })
            .collect::<Vec<_>>();
        ReferenceResult {
            citation_number: n,
            original: format!("Ref {n}"),
            source_type: None,
            errors: if error_count == 0 { None } else { Some(errors) },
            inline_citations: None,
        }
    }

    fn input(results: &[ReferenceResult], total: usize, processed: usize) -> GatingInput<'_> {
        GatingInput {
            results,
            is_partial: false,
            total_submitted: total,
            processed_count: processed,
            results_gated: false,
            revealed: false,
        }
    }

    #[test]
    fn test_all_perfect() {
        let results: Vec<_> = (1..=5).map(|n| result(n, 0)).collect();
        let summary = evaluate(&input(&results, 5, 5));
        assert_eq!(summary.perfect, 5);
        assert_eq!(summary.need_fixes, 0);
        assert_eq!(summary.citations_remaining, 0);
        assert_eq!(summary.mode, VisibilityMode::FullyRevealed);
    }

    #[test]
    fn test_empty_error_list_is_perfect() {
        let mut r = result(1, 0);
        r.errors = Some(vec![]);
        let results = vec![r, result(2, 2)];
        let summary = evaluate(&input(&results, 2, 2));
        assert_eq!(summary.perfect, 1);
        assert_eq!(summary.need_fixes, 1);
    }

    #[test]
    fn test_remaining_never_negative() {
        let results = vec![result(1, 0), result(2, 0)];
        let summary = evaluate(&input(&results, 1, 2));
        assert_eq!(summary.citations_remaining, 0);
    }

    #[test]
    fn test_remaining_zero_when_all_processed() {
        for n in 0..10 {
            let summary = evaluate(&input(&[], n, n));
            assert_eq!(summary.citations_remaining, 0);
        }
    }

    #[test]
    fn test_partial_counts_reflect_present_results() {
        let results = vec![result(1, 0), result(2, 1), result(3, 0)];
        let summary = evaluate(&GatingInput {
            is_partial: true,
            ..input(&results, 6, 3)
        });
        assert!(summary.is_partial);
        assert_eq!(summary.citations_remaining, 3);
        assert_eq!(summary.perfect + summary.need_fixes, 3);
        assert_eq!(summary.mode, VisibilityMode::PartialAwaitingUpgrade);
    }

    #[test]
    fn test_visibility_modes() {
        assert_eq!(visibility(false, false, false), VisibilityMode::FullyRevealed);
        assert_eq!(
            visibility(false, true, false),
            VisibilityMode::GatedPendingReveal
        );
        assert_eq!(visibility(false, true, true), VisibilityMode::FullyRevealed);
        assert_eq!(
            visibility(true, true, true),
            VisibilityMode::PartialAwaitingUpgrade
        );
    }

    #[test]
    fn test_from_partial_job() {
        let mut job = Job::new("job-1", 6);
        job.apply(JobStatusResponse {
            status: JobStatus::Partial,
            results: Some(JobResults {
                results: Some(vec![result(1, 0), result(2, 0), result(3, 1)]),
                ..Default::default()
            }),
            submitted_count: Some(6),
            processed_count: Some(3),
            error: None,
        });

        let summary = evaluate(&GatingInput::from_job(&job, false));
        assert!(summary.is_partial);
        assert_eq!(summary.citations_remaining, 3);
        assert_eq!(summary.perfect, 2);
        assert_eq!(summary.need_fixes, 1);
    }
}
