//! Confidence grading over the executed plan.
//!
//! Deterministic rules, first match wins. The partial-failure diagnostic set
//! (`DiagnosticCode::is_partial_failure`) downgrades otherwise-healthy runs
//! to `insufficient` so callers treat the findings as directional only.

use crate::models::{Confidence, ConfidenceLevel, Diagnostic, DiagnosticCode};
use crate::services::sql::QueryExecution;

pub fn grade_results(
    planned_count: usize,
    executed: &[QueryExecution],
    execution_errors: &[Diagnostic],
    prior_diagnostics: &[Diagnostic],
) -> (Confidence, Vec<Diagnostic>) {
    let mut diagnostics: Vec<Diagnostic> = prior_diagnostics.to_vec();
    diagnostics.extend(execution_errors.iter().cloned());

    let executed_count = executed.len();
    let non_empty = executed.iter().filter(|item| item.has_rows()).count();

    if planned_count == 0 {
        diagnostics.push(Diagnostic::new(
            DiagnosticCode::NoAnalysisPlan,
            "No runnable analyses were produced",
        ));
        return (
            Confidence::insufficient(
                "No analysis plan could be generated from current dataset/question.",
            ),
            diagnostics,
        );
    }

    if executed_count == 0 {
        diagnostics.push(Diagnostic::new(
            DiagnosticCode::NoQueryResults,
            "All planned analyses failed to execute",
        ));
        return (
            Confidence::insufficient(
                "No query executed successfully. Fix dataset schema or question specificity.",
            ),
            diagnostics,
        );
    }

    if non_empty == 0 {
        diagnostics.push(Diagnostic::new(
            DiagnosticCode::EmptyResults,
            "Queries ran but returned empty result sets",
        ));
        return (
            Confidence {
                level: ConfidenceLevel::Low,
                reasons: vec!["Queries returned no rows; conclusions are weak.".to_string()],
            },
            diagnostics,
        );
    }

    let has_partial_failure = diagnostics.iter().any(|d| d.code.is_partial_failure());
    if has_partial_failure {
        return (
            Confidence::insufficient(
                "Partial validation failure detected; use results as directional evidence only.",
            ),
            diagnostics,
        );
    }

    if !execution_errors.is_empty() {
        return (
            Confidence::insufficient(
                "Some planned analyses failed validation/execution; treat findings as partial.",
            ),
            diagnostics,
        );
    }

    let success_rate = executed_count as f64 / planned_count as f64;
    if success_rate >= 0.8 {
        return (
            Confidence {
                level: ConfidenceLevel::High,
                reasons: vec![
                    "Most planned analyses executed successfully with non-empty results."
                        .to_string(),
                ],
            },
            diagnostics,
        );
    }

    if success_rate >= 0.5 {
        return (
            Confidence {
                level: ConfidenceLevel::Medium,
                reasons: vec!["Some analyses executed; some failed or were incomplete.".to_string()],
            },
            diagnostics,
        );
    }

    (
        Confidence::insufficient(
            "Too many analysis steps failed; provide clarifications or cleaner data.",
        ),
        diagnostics,
    )
}
