use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Named stages a job moves through, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Queued,
    DocumentAnalysis,
    EntityResolution,
    ConfidenceGating,
    Validation,
    Commit,
    Finished,
}

impl JobStage {
    pub const PIPELINE: [JobStage; 5] = [
        JobStage::DocumentAnalysis,
        JobStage::EntityResolution,
        JobStage::ConfidenceGating,
        JobStage::Validation,
        JobStage::Commit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::Queued => "queued",
            JobStage::DocumentAnalysis => "document_analysis",
            JobStage::EntityResolution => "entity_resolution",
            JobStage::ConfidenceGating => "confidence_gating",
            JobStage::Validation => "validation",
            JobStage::Commit => "commit",
            JobStage::Finished => "finished",
        }
    }

    /// Progress reported once the stage has durably finished.
    pub fn completed_progress(&self) -> u8 {
        match self {
            JobStage::Queued => 0,
            JobStage::DocumentAnalysis => 30,
            JobStage::EntityResolution => 55,
            JobStage::ConfidenceGating => 70,
            JobStage::Validation => 85,
            JobStage::Commit => 95,
            JobStage::Finished => 100,
        }
    }

    /// Progress reported when the stage begins.
    pub fn started_progress(&self) -> u8 {
        match self {
            JobStage::Queued => 0,
            JobStage::DocumentAnalysis => 5,
            JobStage::EntityResolution => 30,
            JobStage::ConfidenceGating => 55,
            JobStage::Validation => 70,
            JobStage::Commit => 85,
            JobStage::Finished => 100,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            JobStage::Queued => "Waiting for a worker",
            JobStage::DocumentAnalysis => "Analyzing document",
            JobStage::EntityResolution => "Resolving vendors and products",
            JobStage::ConfidenceGating => "Scoring line items",
            JobStage::Validation => "Reconciling totals",
            JobStage::Commit => "Saving invoice",
            JobStage::Finished => "Finished",
        }
    }
}

impl FromStr for JobStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStage::Queued),
            "document_analysis" => Ok(JobStage::DocumentAnalysis),
            "entity_resolution" => Ok(JobStage::EntityResolution),
            "confidence_gating" => Ok(JobStage::ConfidenceGating),
            "validation" => Ok(JobStage::Validation),
            "commit" => Ok(JobStage::Commit),
            "finished" => Ok(JobStage::Finished),
            _ => Err(format!("Invalid job stage: {}", s)),
        }
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
