use crate::github::api::check::{Annotation, AnnotationLevel};

use super::{Conclusion, Diagnostic, Severity};

/// GitHub refuses more than this many annotations in a single check run
/// update.
pub const GITHUB_MAX_ANNOTATIONS: usize = 50;

/// Annotations ready to be sent, in the order they were reported.
#[derive(Debug)]
pub struct Batches {
    pub batches: Vec<Vec<Annotation>>,
    pub conclusion: Conclusion,
    pub reported: usize,
    /// Diagnostics dropped because their severity could not be mapped.
    pub filtered: usize,
}

impl Batches {
    pub fn len(&self) -> usize {
        self.batches.len()
    }
}

/// Convert diagnostics to annotations, split into chunks of at most
/// `max_batch_size`, and compute the overall conclusion.
pub fn batch(diagnostics: &[Diagnostic], max_batch_size: usize, warnings_block: bool) -> Batches {
    let mut filtered = 0;

    let annotations: Vec<_> = diagnostics
        .iter()
        .filter_map(|diag| {
            let level = match diag.severity {
                Severity::Failure => AnnotationLevel::Failure,
                Severity::Warning => AnnotationLevel::Warning,
                Severity::Notice => AnnotationLevel::Notice,
                Severity::Unknown => {
                    filtered += 1;
                    return None;
                }
            };
            Some(Annotation {
                path: diag.path.clone(),
                start_line: diag.start_line,
                end_line: diag.end_line,
                annotation_level: level,
                message: diag.message.clone(),
                title: diag.rule.clone(),
            })
        })
        .collect();

    if filtered > 0 {
        tracing::info!(filtered, "Dropped diagnostics with an unknown severity");
    }

    let conclusion = conclude(diagnostics, warnings_block);
    let reported = annotations.len();
    let batches = annotations
        .chunks(max_batch_size.max(1))
        .map(|chunk| chunk.to_vec())
        .collect();

    Batches {
        batches,
        conclusion,
        reported,
        filtered,
    }
}

/// The conclusion of a check over every diagnostic it received, whether or
/// not they end up being annotated.
///
/// Neutral means that none of the diagnostics had a known severity.
pub fn conclude(diagnostics: &[Diagnostic], warnings_block: bool) -> Conclusion {
    let has = |severity| diagnostics.iter().any(|d| d.severity == severity);

    if has(Severity::Failure) || (warnings_block && has(Severity::Warning)) {
        Conclusion::Failure
    } else if !diagnostics.is_empty()
        && diagnostics.iter().all(|d| d.severity == Severity::Unknown)
    {
        Conclusion::Neutral
    } else {
        Conclusion::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diags(severities: &[Severity]) -> Vec<Diagnostic> {
        severities
            .iter()
            .enumerate()
            .map(|(i, s)| Diagnostic::new(&format!("file{i}.rs"), i + 1, *s))
            .collect()
    }

    #[test]
    fn empty_input_succeeds() {
        let out = batch(&[], 50, false);
        assert_eq!(out.len(), 0);
        assert_eq!(out.conclusion, Conclusion::Success);
        assert_eq!(out.reported, 0);
        assert_eq!(out.filtered, 0);
    }

    #[test]
    fn mixed_warnings_and_failures() {
        let mut severities = vec![Severity::Warning; 100];
        severities.extend([Severity::Failure; 20]);
        let out = batch(&diags(&severities), 50, false);

        let sizes: Vec<_> = out.batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, [50, 50, 20]);
        assert_eq!(out.conclusion, Conclusion::Failure);
        assert_eq!(out.reported, 120);
        assert_eq!(out.filtered, 0);
    }

    #[test]
    fn batches_preserve_order() {
        let severities = [
            Severity::Notice,
            Severity::Unknown,
            Severity::Warning,
            Severity::Notice,
            Severity::Unknown,
            Severity::Warning,
            Severity::Notice,
        ];
        let input = diags(&severities);

        for max in 1..=8 {
            let out = batch(&input, max, false);
            let survivors = input
                .iter()
                .filter(|d| d.severity != Severity::Unknown)
                .count();
            assert_eq!(out.len(), survivors.div_ceil(max));
            assert!(out.batches.iter().all(|b| b.len() <= max && !b.is_empty()));

            let paths: Vec<_> = out.batches.concat().into_iter().map(|a| a.path).collect();
            let expected: Vec<_> = input
                .iter()
                .filter(|d| d.severity != Severity::Unknown)
                .map(|d| d.path.clone())
                .collect();
            assert_eq!(paths, expected);
            assert_eq!(out.filtered, 2);
        }
    }

    #[test]
    fn all_filtered_is_neutral() {
        let out = batch(&diags(&[Severity::Unknown; 3]), 50, false);
        assert_eq!(out.len(), 0);
        assert_eq!(out.conclusion, Conclusion::Neutral);
        assert_eq!(out.filtered, 3);
    }

    #[test]
    fn warnings_block_only_when_asked() {
        let input = diags(&[Severity::Notice, Severity::Warning]);
        assert_eq!(batch(&input, 50, false).conclusion, Conclusion::Success);
        assert_eq!(batch(&input, 50, true).conclusion, Conclusion::Failure);
    }

    #[test]
    fn failure_wins_over_unknown() {
        let out = batch(&diags(&[Severity::Unknown, Severity::Failure]), 50, false);
        assert_eq!(out.conclusion, Conclusion::Failure);
        assert_eq!(out.reported, 1);
        assert_eq!(out.filtered, 1);
    }

    #[test]
    fn conclusion_covers_unannotated_diagnostics() {
        let input = diags(&[Severity::Unknown, Severity::Failure]);
        assert_eq!(conclude(&input, false), Conclusion::Failure);
        assert_eq!(conclude(&input[..1], false), Conclusion::Neutral);
        assert_eq!(conclude(&[], true), Conclusion::Success);
    }

    #[test]
    fn annotation_fields() {
        let mut diag = Diagnostic::new("src/main.rs", 3, Severity::Notice);
        diag.end_line = 5;
        diag.rule = Some("clippy::needless_return".to_owned());
        let out = batch(&[diag], 50, false);

        let annotation = &out.batches[0][0];
        assert_eq!(annotation.path, "src/main.rs");
        assert_eq!(annotation.start_line, 3);
        assert_eq!(annotation.end_line, 5);
        assert_eq!(annotation.annotation_level, AnnotationLevel::Notice);
        assert_eq!(annotation.title.as_deref(), Some("clippy::needless_return"));
    }

    #[test]
    fn zero_batch_size_is_treated_as_one() {
        let out = batch(&diags(&[Severity::Notice; 3]), 0, false);
        assert_eq!(out.len(), 3);
    }
}
