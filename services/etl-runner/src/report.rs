//! Run report rendering and exit status.

use pipeline::{JobSpec, OutputRecord, OutputStatus, PipelineError, RunSummary, VariableDescriptor};
use serde::Serialize;
use std::fmt::Write;

/// Every job finished and every variable succeeded.
pub const EXIT_OK: u8 = 0;
/// Nothing ran: configuration problems or every job aborted.
pub const EXIT_FATAL: u8 = 1;
/// Some variables failed or were skipped, or some jobs aborted.
pub const EXIT_INCOMPLETE: u8 = 2;

/// One job's entry in the JSON report.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum JobReport<'a> {
    Completed(&'a RunSummary),
    Aborted { job: &'a str, error: String },
}

pub fn job_reports<'a>(
    jobs: &'a [JobSpec],
    results: &'a [Result<RunSummary, PipelineError>],
) -> Vec<JobReport<'a>> {
    jobs.iter()
        .zip(results)
        .map(|(job, result)| match result {
            Ok(summary) => JobReport::Completed(summary),
            Err(e) => JobReport::Aborted {
                job: &job.name,
                error: e.to_string(),
            },
        })
        .collect()
}

pub fn exit_status(results: &[Result<RunSummary, PipelineError>]) -> u8 {
    if !results.is_empty() && results.iter().all(Result::is_err) {
        return EXIT_FATAL;
    }
    let incomplete = results.iter().any(|r| match r {
        Ok(summary) => !summary.all_succeeded(),
        Err(_) => true,
    });
    if incomplete {
        EXIT_INCOMPLETE
    } else {
        EXIT_OK
    }
}

/// `variable  status  location-or-error`
pub fn record_line(record: &OutputRecord) -> String {
    let detail = match record.status {
        OutputStatus::Success => record.location().unwrap_or_default(),
        OutputStatus::Failed => match (&record.error_kind, &record.error) {
            (Some(kind), Some(error)) => format!("{}: {}", kind, error),
            (_, Some(error)) => error.clone(),
            _ => String::new(),
        },
        OutputStatus::Skipped => "cancelled before start".to_string(),
    };
    format!("{:<12} {:<8} {}", record.variable, record.status, detail)
}

pub fn render_text(jobs: &[JobSpec], results: &[Result<RunSummary, PipelineError>]) -> String {
    let mut out = String::new();
    for (job, result) in jobs.iter().zip(results) {
        match result {
            Ok(summary) => {
                let _ = writeln!(
                    out,
                    "== {} ({}, {} {}) ==",
                    summary.job, summary.aoi, summary.year, summary.season
                );
                for record in &summary.records {
                    let _ = writeln!(out, "{}", record_line(record));
                }
                let _ = writeln!(
                    out,
                    "{} variables: {} succeeded, {} failed, {} skipped{}",
                    summary.records.len(),
                    summary.count(OutputStatus::Success),
                    summary.count(OutputStatus::Failed),
                    summary.count(OutputStatus::Skipped),
                    if summary.cancelled { " (cancelled)" } else { "" }
                );
            }
            Err(e) => {
                let _ = writeln!(out, "== {} ==\naborted: {}", job.name, e);
            }
        }
    }
    out
}

pub fn render_variables(variables: &[VariableDescriptor]) -> String {
    let mut out = String::new();
    for v in variables {
        let seasons: Vec<&str> = v.seasons.iter().map(|s| s.as_str()).collect();
        let _ = writeln!(
            out,
            "{:<12} {:<12} {:<17} {:<13} {:<8} {}",
            v.name,
            v.kind.as_str(),
            v.extractor.source,
            v.coverage,
            v.data_type,
            seasons.join(",")
        );
        let _ = writeln!(out, "{:<12} {}", "", v.description);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline::{AoiError, ExportReceipt, UnknownVariableError, VariableError, VariableRegistry};
    use std::path::PathBuf;

    fn summary(records: Vec<OutputRecord>) -> RunSummary {
        RunSummary {
            job: "field-a".into(),
            aoi: "field_a".into(),
            year: 2023,
            season: "summer".into(),
            records,
            cancelled: false,
        }
    }

    fn success(variable: &str) -> OutputRecord {
        let receipt = ExportReceipt {
            local_path: PathBuf::from(format!("out/{}.tif", variable)),
            remote_uri: None,
            bytes: 100,
        };
        OutputRecord::success(variable, receipt, 0, 4, 10)
    }

    fn unknown(variable: &str) -> OutputRecord {
        let err = VariableError::from(UnknownVariableError {
            name: variable.into(),
            known: vec!["ndvi".into()],
        });
        OutputRecord::failed(variable, &err, 0, 1)
    }

    #[test]
    fn test_exit_status() {
        assert_eq!(exit_status(&[Ok(summary(vec![success("ndvi")]))]), EXIT_OK);
        assert_eq!(
            exit_status(&[Ok(summary(vec![success("ndvi"), unknown("foo")]))]),
            EXIT_INCOMPLETE
        );
        assert_eq!(
            exit_status(&[Ok(summary(vec![OutputRecord::skipped("ndvi")]))]),
            EXIT_INCOMPLETE
        );
        assert_eq!(
            exit_status(&[Err(AoiError::MissingCrs.into()), Ok(summary(vec![success("ndvi")]))]),
            EXIT_INCOMPLETE
        );
        assert_eq!(exit_status(&[Err(AoiError::MissingCrs.into())]), EXIT_FATAL);
    }

    #[test]
    fn test_record_lines() {
        let line = record_line(&success("ndvi"));
        assert!(line.starts_with("ndvi"));
        assert!(line.contains("success"));
        assert!(line.ends_with("out/ndvi.tif"));

        let line = record_line(&unknown("foo"));
        assert!(line.contains("failed"));
        assert!(line.contains("UnknownVariableError: unknown variable 'foo'"));
    }

    #[test]
    fn test_json_report_shapes() {
        let completed = summary(vec![success("ndvi")]);
        let json = serde_json::to_value(JobReport::Completed(&completed)).unwrap();
        assert_eq!(json["job"], "field-a");
        assert_eq!(json["records"][0]["status"], "success");

        let aborted = JobReport::Aborted {
            job: "field-b",
            error: "AOI error: x".into(),
        };
        let json = serde_json::to_value(aborted).unwrap();
        assert_eq!(json["job"], "field-b");
        assert_eq!(json["error"], "AOI error: x");
    }

    #[test]
    fn test_variable_listing() {
        let registry = VariableRegistry::global().unwrap();
        let text = render_variables(registry.describe());
        assert!(text.lines().any(|l| l.starts_with("clcplus") && l.contains("categorical")));
        assert!(text.contains("2018-2023"));
    }
}
