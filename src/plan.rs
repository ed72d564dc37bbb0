//! The per-file decision policy: given what the store remembers and what is on
//! disk now, does this file need work?
//!
//! [`decide`] is a pure function. Everything it needs (current fingerprint,
//! resolved record, artifact presence) is gathered by the orchestrator first,
//! which keeps the policy trivially testable.

use crate::fingerprint::Fingerprint;
use crate::store::Resolution;
use std::fmt;

/// Why a file is being converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvertReason {
    /// Force mode: the store is bypassed.
    Forced,
    /// No record for this file.
    New,
    /// Could not hash the file, so freshness is unknown.
    Unfingerprinted,
    /// Content differs from the recorded fingerprint.
    Changed,
    /// The last attempt failed or faulted.
    Retry,
    /// Record says success but the output is gone.
    ArtifactMissing,
}

/// Why a file is being skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Same content, output present.
    UpToDate,
    /// The intermediate PDF is gone but the final Markdown exists.
    SatisfiedByCompanion,
    /// The file moved; its previous output is still in place.
    Moved,
    /// Office file whose converter is not installed.
    ConverterUnavailable,
}

/// What to do with one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    Skip(SkipReason),
    /// Full pipeline: converter (office files) then parser.
    Convert(ConvertReason),
    /// Office file whose intermediate PDF is still valid: parser only.
    ParseOnly,
}

impl Plan {
    pub fn is_skip(&self) -> bool {
        matches!(self, Plan::Skip(_))
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Plan::Skip(r) => write!(f, "skip ({r:?})"),
            Plan::Convert(r) => write!(f, "convert ({r:?})"),
            Plan::ParseOnly => f.write_str("parse only"),
        }
    }
}

/// On-disk artifact presence for one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Artifacts {
    /// The artifact this stage produces: final Markdown for a PDF, the
    /// intermediate PDF (non-placeholder) for an office file.
    pub expected: bool,
    /// The later-stage artifact, when there is one: final Markdown for an
    /// office file, `None` for a PDF.
    pub companion: Option<bool>,
    /// The output path remembered by the matched record exists.
    pub recorded_output: bool,
}

/// Decide what to do with a file.
///
/// * `current` is `None` when fingerprinting failed.
/// * `prior` is the identity resolution result, if any.
pub fn decide(
    current: Option<&Fingerprint>,
    prior: Option<&Resolution>,
    artifacts: Artifacts,
) -> Plan {
    let Some(current) = current else {
        return Plan::Convert(ConvertReason::Unfingerprinted);
    };
    let Some(prior) = prior else {
        return Plan::Convert(ConvertReason::New);
    };
    if !prior.entry.status().is_success() {
        return Plan::Convert(ConvertReason::Retry);
    }
    if prior.entry.fingerprint() != Some(current) {
        return Plan::Convert(ConvertReason::Changed);
    }

    if artifacts.expected {
        return match artifacts.companion {
            Some(false) => Plan::ParseOnly,
            _ => Plan::Skip(SkipReason::UpToDate),
        };
    }
    if artifacts.companion == Some(true) {
        return Plan::Skip(SkipReason::SatisfiedByCompanion);
    }
    // Output written under an earlier name still counts, unless the record
    // belongs to another live file (a copy).
    if artifacts.recorded_output && !prior.origin_exists {
        return Plan::Skip(if prior.is_move() {
            SkipReason::Moved
        } else {
            SkipReason::UpToDate
        });
    }
    Plan::Convert(ConvertReason::ArtifactMissing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ConversionRecord, ConversionStatus, MatchKind, StoredEntry};

    fn fp(s: &str) -> Fingerprint {
        Fingerprint::from_hex(s)
    }

    fn resolution(fingerprint: &str, status: ConversionStatus, kind: MatchKind) -> Resolution {
        Resolution {
            key: "k".into(),
            kind,
            entry: StoredEntry::Current(ConversionRecord::new(Some(fp(fingerprint)), status)),
            origin_exists: false,
        }
    }

    fn pdf(expected: bool) -> Artifacts {
        Artifacts {
            expected,
            ..Artifacts::default()
        }
    }

    fn office(intermediate: bool, markdown: bool) -> Artifacts {
        Artifacts {
            expected: intermediate,
            companion: Some(markdown),
            recorded_output: false,
        }
    }

    #[test]
    fn unfingerprinted_always_converts() {
        let r = resolution("aa", ConversionStatus::Success, MatchKind::Canonical);
        assert_eq!(
            decide(None, Some(&r), pdf(true)),
            Plan::Convert(ConvertReason::Unfingerprinted)
        );
    }

    #[test]
    fn no_record_converts() {
        assert_eq!(
            decide(Some(&fp("aa")), None, pdf(true)),
            Plan::Convert(ConvertReason::New)
        );
    }

    #[test]
    fn success_unchanged_with_output_skips() {
        let r = resolution("aa", ConversionStatus::Success, MatchKind::Canonical);
        assert_eq!(
            decide(Some(&fp("aa")), Some(&r), pdf(true)),
            Plan::Skip(SkipReason::UpToDate)
        );
    }

    #[test]
    fn success_unchanged_without_output_converts() {
        let r = resolution("aa", ConversionStatus::Success, MatchKind::Canonical);
        assert_eq!(
            decide(Some(&fp("aa")), Some(&r), pdf(false)),
            Plan::Convert(ConvertReason::ArtifactMissing)
        );
    }

    #[test]
    fn changed_fingerprint_converts() {
        let r = resolution("aa", ConversionStatus::Success, MatchKind::Canonical);
        assert_eq!(
            decide(Some(&fp("bb")), Some(&r), pdf(true)),
            Plan::Convert(ConvertReason::Changed)
        );
    }

    #[test]
    fn failed_and_errored_records_always_retry() {
        for status in [ConversionStatus::Failed, ConversionStatus::Error("x".into())] {
            let r = resolution("aa", status, MatchKind::Canonical);
            assert_eq!(
                decide(Some(&fp("aa")), Some(&r), pdf(true)),
                Plan::Convert(ConvertReason::Retry)
            );
        }
    }

    #[test]
    fn office_companion_markdown_satisfies_missing_intermediate() {
        let r = resolution("aa", ConversionStatus::Success, MatchKind::Canonical);
        assert_eq!(
            decide(Some(&fp("aa")), Some(&r), office(false, true)),
            Plan::Skip(SkipReason::SatisfiedByCompanion)
        );
    }

    #[test]
    fn office_intermediate_without_markdown_parses_only() {
        let r = resolution("aa", ConversionStatus::Success, MatchKind::Canonical);
        assert_eq!(
            decide(Some(&fp("aa")), Some(&r), office(true, false)),
            Plan::ParseOnly
        );
        assert_eq!(
            decide(Some(&fp("aa")), Some(&r), office(true, true)),
            Plan::Skip(SkipReason::UpToDate)
        );
        assert_eq!(
            decide(Some(&fp("aa")), Some(&r), office(false, false)),
            Plan::Convert(ConvertReason::ArtifactMissing)
        );
    }

    #[test]
    fn moved_file_with_surviving_output_skips() {
        let r = resolution("aa", ConversionStatus::Success, MatchKind::Fingerprint);
        let artifacts = Artifacts {
            expected: false,
            companion: None,
            recorded_output: true,
        };
        assert_eq!(
            decide(Some(&fp("aa")), Some(&r), artifacts),
            Plan::Skip(SkipReason::Moved)
        );
    }

    #[test]
    fn migrated_record_keeps_honouring_its_recorded_output() {
        let r = resolution("aa", ConversionStatus::Success, MatchKind::Canonical);
        let artifacts = Artifacts {
            expected: false,
            companion: None,
            recorded_output: true,
        };
        assert_eq!(
            decide(Some(&fp("aa")), Some(&r), artifacts),
            Plan::Skip(SkipReason::UpToDate)
        );
    }

    #[test]
    fn copied_file_is_converted_even_if_original_output_exists() {
        let mut r = resolution("aa", ConversionStatus::Success, MatchKind::Fingerprint);
        r.origin_exists = true;
        let artifacts = Artifacts {
            expected: false,
            companion: None,
            recorded_output: true,
        };
        assert_eq!(
            decide(Some(&fp("aa")), Some(&r), artifacts),
            Plan::Convert(ConvertReason::ArtifactMissing)
        );
    }

    #[test]
    fn legacy_entry_behaves_as_success() {
        let r = Resolution {
            key: "a.pdf".into(),
            kind: MatchKind::Canonical,
            entry: StoredEntry::Legacy(fp("aa")),
            origin_exists: false,
        };
        assert_eq!(
            decide(Some(&fp("aa")), Some(&r), pdf(true)),
            Plan::Skip(SkipReason::UpToDate)
        );
        assert_eq!(
            decide(Some(&fp("ab")), Some(&r), pdf(true)),
            Plan::Convert(ConvertReason::Changed)
        );
    }
}
