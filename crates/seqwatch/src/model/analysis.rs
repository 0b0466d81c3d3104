//! Upload/analysis aggregate shown in the history view.
//!
//! An upload owns at most one analysis per tool. Each analysis moves
//! pending → running → success|error and reaches a terminal status once.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::job::{AlignTool, JobStatus, StatusSource};
use super::timestamp;
use crate::error::LifecycleError;

/// Metrics the worker attaches to a finished analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    /// Wall-clock seconds.
    pub execution_time: f64,
    pub sequence_count: u64,
    pub average_sequence_length: f64,
}

/// Free-form bookkeeping the backend stores next to an analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisExtra {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_metrics: Option<ExecutionMetrics>,
}

/// One tool run for an upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub id: i64,
    pub method: AlignTool,
    pub status: JobStatus,
    #[serde(default)]
    pub result_file: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(with = "timestamp")]
    pub created_at: NaiveDateTime,
    #[serde(default, with = "timestamp::option")]
    pub updated_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub extra_data: Option<AnalysisExtra>,
}

impl Analysis {
    /// Creates a pending analysis for a freshly started tool run.
    pub fn started(id: i64, method: AlignTool, task_id: &str, at: NaiveDateTime) -> Self {
        Self {
            id,
            method,
            status: JobStatus::Pending,
            result_file: None,
            error: None,
            created_at: at,
            updated_at: Some(at),
            extra_data: Some(AnalysisExtra {
                task_id: Some(task_id.to_string()),
                ..AnalysisExtra::default()
            }),
        }
    }

    pub fn task_id(&self) -> Option<&str> {
        self.extra_data.as_ref().and_then(|e| e.task_id.as_deref())
    }

    pub fn metrics(&self) -> Option<&ExecutionMetrics> {
        self.extra_data
            .as_ref()
            .and_then(|e| e.execution_metrics.as_ref())
    }

    /// Time of the last observed change.
    pub fn last_update(&self) -> NaiveDateTime {
        self.updated_at.unwrap_or(self.created_at)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Moves the analysis to `next`.
    ///
    /// Re-applying the current status is a no-op. Leaving a terminal status
    /// or stepping back from running to pending is rejected.
    pub fn transition(&mut self, next: JobStatus, at: NaiveDateTime) -> Result<(), LifecycleError> {
        if next == self.status {
            return Ok(());
        }
        if self.status.is_terminal() {
            return Err(LifecycleError::AlreadyTerminal {
                id: self.id,
                from: self.status,
                to: next,
            });
        }
        if next.rank() < self.status.rank() {
            return Err(LifecycleError::Regression {
                id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Some(at);
        Ok(())
    }

    /// Marks the analysis successful with its result file.
    pub fn complete(&mut self, result_file: &str, at: NaiveDateTime) -> Result<(), LifecycleError> {
        self.transition(JobStatus::Success, at)?;
        self.result_file = Some(result_file.to_string());
        Ok(())
    }

    /// Marks the analysis failed with an inspectable error message.
    pub fn fail(&mut self, error: &str, at: NaiveDateTime) -> Result<(), LifecycleError> {
        self.transition(JobStatus::Error, at)?;
        self.error = Some(error.to_string());
        Ok(())
    }
}

impl StatusSource for Analysis {
    fn current_status(&self) -> JobStatus {
        self.status
    }
}

/// A submitted input file and the analyses run against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Upload {
    pub id: i64,
    pub filename: String,
    #[serde(with = "timestamp")]
    pub created_at: NaiveDateTime,
    #[serde(default)]
    pub analyses: Vec<Analysis>,
}

impl Upload {
    pub fn analysis_for(&self, tool: AlignTool) -> Option<&Analysis> {
        self.analyses.iter().find(|a| a.method == tool)
    }

    pub fn analysis_for_task_mut(&mut self, task_id: &str) -> Option<&mut Analysis> {
        self.analyses
            .iter_mut()
            .find(|a| a.task_id() == Some(task_id))
    }

    /// Attaches a new analysis; one per tool.
    pub fn attach(&mut self, analysis: Analysis) -> Result<(), LifecycleError> {
        if self.analysis_for(analysis.method).is_some() {
            return Err(LifecycleError::DuplicateAnalysis {
                upload_id: self.id,
                tool: analysis.method.to_string(),
            });
        }
        self.analyses.push(analysis);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(10, m, 0)
            .unwrap()
    }

    #[test]
    fn test_decode_history_payload() {
        let json = r#"[{
            "id": 1,
            "filename": "reads.fasta",
            "created_at": "2024-05-01T10:00:00",
            "analyses": [{
                "id": 4,
                "method": "uclust",
                "status": "FAILURE",
                "result_file": null,
                "error": "bad input",
                "created_at": "2024-05-01T10:01:00",
                "extra_data": {"task_id": "abc", "execution_metrics": {
                    "execution_time": 1.5, "sequence_count": 20, "average_sequence_length": 310.0
                }}
            }]
        }]"#;
        let uploads: Vec<Upload> = serde_json::from_str(json).unwrap();
        let analysis = uploads[0].analysis_for(AlignTool::Uclust).unwrap();
        assert_eq!(analysis.status, JobStatus::Error);
        assert_eq!(analysis.task_id(), Some("abc"));
        assert_eq!(analysis.metrics().unwrap().sequence_count, 20);
        assert_eq!(analysis.last_update(), at(1));
    }

    #[test]
    fn test_lifecycle_happy_path() {
        let mut a = Analysis::started(1, AlignTool::Mafft, "t1", at(0));
        a.transition(JobStatus::Running, at(1)).unwrap();
        a.complete("out.fasta", at(2)).unwrap();
        assert_eq!(a.status, JobStatus::Success);
        assert_eq!(a.result_file.as_deref(), Some("out.fasta"));
        assert_eq!(a.last_update(), at(2));
    }

    #[test]
    fn test_terminal_is_reached_once() {
        let mut a = Analysis::started(1, AlignTool::Mafft, "t1", at(0));
        a.fail("boom", at(1)).unwrap();
        let err = a.transition(JobStatus::Running, at(2)).unwrap_err();
        assert_eq!(
            err,
            LifecycleError::AlreadyTerminal {
                id: 1,
                from: JobStatus::Error,
                to: JobStatus::Running
            }
        );
        assert!(a.complete("x", at(3)).is_err());
        assert_eq!(a.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_same_status_is_noop() {
        let mut a = Analysis::started(1, AlignTool::Mafft, "t1", at(0));
        a.transition(JobStatus::Pending, at(5)).unwrap();
        assert_eq!(a.last_update(), at(0));
    }

    #[test]
    fn test_running_cannot_go_back_to_pending() {
        let mut a = Analysis::started(1, AlignTool::Vsearch, "t1", at(0));
        a.transition(JobStatus::Running, at(1)).unwrap();
        assert!(matches!(
            a.transition(JobStatus::Pending, at(2)),
            Err(LifecycleError::Regression { .. })
        ));
    }

    #[test]
    fn test_one_analysis_per_tool() {
        let mut upload = Upload {
            id: 9,
            filename: "reads.fasta".to_string(),
            created_at: at(0),
            analyses: vec![],
        };
        upload
            .attach(Analysis::started(1, AlignTool::Mafft, "t1", at(1)))
            .unwrap();
        assert!(upload
            .attach(Analysis::started(2, AlignTool::Mafft, "t2", at(2)))
            .is_err());
        assert!(upload.analysis_for_task_mut("t1").is_some());
    }
}
