use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{MLAnalysisType, RecordIdentity};
use crate::errors::VerifierError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AnalysisStatus {
    #[serde(rename = "LE_ANALYSIS_COMPLETE")]
    LeAnalysisComplete,
    #[serde(rename = "FEEDBACK_ANALYSIS_COMPLETE")]
    FeedbackAnalysisComplete,
}

impl AnalysisStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisStatus::LeAnalysisComplete => "LE_ANALYSIS_COMPLETE",
            AnalysisStatus::FeedbackAnalysisComplete => "FEEDBACK_ANALYSIS_COMPLETE",
        }
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisStatus {
    type Err = VerifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LE_ANALYSIS_COMPLETE" => Ok(AnalysisStatus::LeAnalysisComplete),
            "FEEDBACK_ANALYSIS_COMPLETE" => Ok(AnalysisStatus::FeedbackAnalysisComplete),
            _ => Err(VerifierError::Serialization(format!(
                "Invalid analysis status: {s}"
            ))),
        }
    }
}

/// 学习引擎返回的分析结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisRecord {
    pub identity: RecordIdentity,
    pub analysis_minute: i64,
    pub ml_analysis_type: MLAnalysisType,
    pub status: AnalysisStatus,
    pub summary: Option<String>,
    /// 学习引擎的原始结果，不做解释
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AnalysisRecord {
    pub fn new(
        identity: RecordIdentity,
        analysis_minute: i64,
        ml_analysis_type: MLAnalysisType,
        payload: serde_json::Value,
    ) -> Self {
        let status = if ml_analysis_type == MLAnalysisType::FeedbackAnalysis {
            AnalysisStatus::FeedbackAnalysisComplete
        } else {
            AnalysisStatus::LeAnalysisComplete
        };
        Self {
            identity,
            analysis_minute,
            ml_analysis_type,
            status,
            summary: None,
            payload,
            created_at: Utc::now(),
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }
}
