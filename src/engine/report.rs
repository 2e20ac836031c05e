//! Reports of what an operation did on the workers.
//!
//! Remote failures end up here as values; a report with failures is still a
//! normal return value of the operation that produced it.

use std::fs;
use std::path::Path;

use color_eyre::eyre::{Context, Result};
use serde::Serialize;

use crate::alloc::VlanId;
use crate::remote::RemoteError;
use crate::topology::{Interconnection, TopologyGroup};

/// A single remote step on one tap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RemoteAction {
    EnsureTap,
    ClearVlan,
    SetVlan { vlan: VlanId },
    RemoveTap,
}

/// What happened to a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum StepOutcome {
    Done,
    Failed(RemoteError),
    /// Not attempted because an earlier step on the tap failed
    Skipped,
}

impl From<Result<(), RemoteError>> for StepOutcome {
    fn from(result: Result<(), RemoteError>) -> Self {
        match result {
            Ok(()) => StepOutcome::Done,
            Err(e) => StepOutcome::Failed(e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub vm: String,
    pub worker: String,
    pub tap: String,
    #[serde(flatten)]
    pub action: RemoteAction,
    pub outcome: StepOutcome,
}

impl StepRecord {
    pub fn is_done(&self) -> bool {
        self.outcome == StepOutcome::Done
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, StepOutcome::Failed(_))
    }
}

/// Result of one point-to-point link
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkReport {
    pub vlan: VlanId,
    pub a: String,
    pub b: String,
    pub tap_a: String,
    pub tap_b: String,
    /// Every step on both endpoints succeeded
    pub ok: bool,
}

/// Everything one request did, in plan order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub steps: Vec<StepRecord>,
    pub links: Vec<LinkReport>,
}

impl ApplyReport {
    /// The tap-ensure step of every endpoint
    pub fn tap_ensures(&self) -> impl Iterator<Item = &StepRecord> {
        self.steps
            .iter()
            .filter(|s| s.action == RemoteAction::EnsureTap)
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepRecord> {
        self.steps.iter().filter(|s| s.is_failure())
    }

    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }

    pub fn is_success(&self) -> bool {
        self.steps.iter().all(StepRecord::is_done)
    }

    pub fn merge(&mut self, other: ApplyReport) {
        self.steps.extend(other.steps);
        self.links.extend(other.links);
    }

    /// Human-readable summary, one line per link and per failed step
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for link in &self.links {
            lines.push(format!(
                "  {} {} <-> {} vlan {} ({} / {})",
                if link.ok { "OK  " } else { "FAIL" },
                link.a,
                link.b,
                link.vlan,
                link.tap_a,
                link.tap_b
            ));
        }
        for step in self.failures() {
            if let StepOutcome::Failed(error) = &step.outcome {
                lines.push(format!(
                    "  error on {} ({}) {}: {}",
                    step.vm,
                    step.worker,
                    step.tap,
                    error
                ));
            }
        }
        let done = self.steps.iter().filter(|s| s.is_done()).count();
        let skipped = self
            .steps
            .iter()
            .filter(|s| s.outcome == StepOutcome::Skipped)
            .count();
        lines.push(format!(
            "  {} steps ok, {} failed, {} skipped",
            done,
            self.failure_count(),
            skipped
        ));
        lines
    }
}

/// One request applied during a session
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub request: String,
    pub report: ApplyReport,
}

/// Final state of a session plus every run, for `--report`
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub generated_at: String,
    pub groups: Vec<TopologyGroup>,
    pub interconnections: Vec<Interconnection>,
    pub runs: Vec<RunRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_vlan: Option<VlanId>,
}

impl SessionReport {
    pub fn new(
        groups: Vec<TopologyGroup>,
        interconnections: Vec<Interconnection>,
        runs: Vec<RunRecord>,
        next_vlan: Option<VlanId>,
    ) -> Self {
        SessionReport {
            generated_at: chrono::Utc::now().to_rfc3339(),
            groups,
            interconnections,
            runs,
            next_vlan,
        }
    }

    pub fn failure_count(&self) -> usize {
        self.runs.iter().map(|r| r.report.failure_count()).sum()
    }
}

/// Write a session report as pretty JSON
pub fn write_json_report(report: &SessionReport, output_path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize report to JSON")?;

    fs::write(output_path, json)
        .with_context(|| format!("Failed to write JSON report to {}", output_path.display()))?;

    log::info!("JSON report written to {}", output_path.display());
    Ok(())
}
