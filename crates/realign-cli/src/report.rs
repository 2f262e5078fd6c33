//! JSON rendering of run reports

use realign_core::config::Mode;
use realign_core::gate::SkipReason;
use realign_core::select::Decision;
use realign_core::types::{Feature, FeatureId, ReferenceVersion};
use realign_core::workflow::{Outcome, RunCounts, RunReport};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Serialize)]
pub struct ReportView<'a> {
    run_id: String,
    mode: Mode,
    reference_version: &'a ReferenceVersion,
    started_at: String,
    finished_at: String,
    counts: RunCounts,
    outcomes: BTreeMap<&'a FeatureId, OutcomeView<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum OutcomeView<'a> {
    Decided { decision: &'a Decision },
    Skipped { skip: &'a SkipReason },
    Failed { kind: &'static str, reason: String },
}

impl<'a> From<&'a RunReport> for ReportView<'a> {
    fn from(report: &'a RunReport) -> Self {
        Self {
            run_id: report.run_id.to_string(),
            mode: report.mode,
            reference_version: &report.reference_version,
            started_at: report.started_at.to_rfc3339(),
            finished_at: report.finished_at.to_rfc3339(),
            counts: report.counts(),
            outcomes: report
                .outcomes
                .iter()
                .map(|(id, outcome)| (id, OutcomeView::from(outcome)))
                .collect(),
        }
    }
}

impl<'a> From<&'a Outcome> for OutcomeView<'a> {
    fn from(outcome: &'a Outcome) -> Self {
        match outcome {
            Outcome::Decided(decision) => OutcomeView::Decided { decision },
            Outcome::Skipped(skip) => OutcomeView::Skipped { skip },
            Outcome::Failed(err) => OutcomeView::Failed {
                kind: err.kind(),
                reason: err.to_string(),
            },
        }
    }
}

/// Input features with every applicable decision written back
///
/// Features whose decision cannot be applied (several predictions, nothing usable) are
/// returned unchanged and logged.
pub fn apply(features: &[Feature], report: &RunReport, provenance_field: &str) -> Vec<Feature> {
    features
        .iter()
        .map(|feature| {
            let Some(decision) = report.decision(&feature.id) else {
                return feature.clone();
            };
            match feature.with_decision(decision, provenance_field) {
                Ok(updated) => updated,
                Err(e) => {
                    tracing::warn!("Keeping feature {} unchanged: {}", feature.id, e);
                    feature.clone()
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use realign_core::error::FeatureError;

    #[test]
    fn test_failed_outcome_renders_kind_and_reason() {
        let outcome = Outcome::Failed(FeatureError::DuplicateId("7".into()));
        let json = serde_json::to_value(OutcomeView::from(&outcome)).unwrap();

        assert_eq!(json["status"], "failed");
        assert_eq!(json["kind"], "duplicate_id");
        assert_eq!(json["reason"], "Duplicate feature id in batch: 7");
    }

    #[test]
    fn test_skipped_outcome_renders_reason() {
        let outcome = Outcome::Skipped(SkipReason::UpToDate);
        let json = serde_json::to_value(OutcomeView::from(&outcome)).unwrap();

        assert_eq!(json["status"], "skipped");
        assert_eq!(json["skip"]["reason"], "up_to_date");
    }
}
