//! Asynchronous TAP jobs (IVOA UWS).
//!
//! A [`Job`] is the client-side handle of a server-side job. Its phase only
//! changes when the server reports a new one; the client never infers a
//! transition on its own.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use votable::OutputFormat;

use crate::error::{TapError, TapResult};
use crate::xml::{self, Element};

/// UWS execution phase.
///
/// TAP services move a submitted job through
/// `QUEUED → EXECUTING → {COMPLETED, ERROR, ABORTED}`; the remaining
/// phases are part of UWS and show up on some servers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobPhase {
    Pending,
    Queued,
    Executing,
    Completed,
    Error,
    Aborted,
    Held,
    Suspended,
    Archived,
    Unknown,
}

impl JobPhase {
    /// Parse a phase as reported by a server; unrecognised text is `Unknown`.
    pub fn parse_reported(text: &str) -> JobPhase {
        text.trim().parse().unwrap_or(JobPhase::Unknown)
    }

    /// Whether the job can no longer change phase.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobPhase::Completed | JobPhase::Error | JobPhase::Aborted | JobPhase::Archived
        )
    }
}

/// A result document listed by the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRef {
    pub id: String,
    pub href: String,
}

/// Client-side handle of an asynchronous job.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    /// Server-assigned identifier
    pub job_id: String,
    /// Job resource, `{tap}/async/{job_id}`
    pub url: String,
    pub phase: JobPhase,
    /// Format the results were requested in
    pub format: OutputFormat,
    pub query: Option<String>,
    /// TAP `UPLOAD` parameter the job was submitted with
    pub upload: Option<String>,
    pub owner: Option<String>,
    pub run_id: Option<String>,
    pub creation_time: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Seconds the server allows the job to run
    pub execution_duration: Option<u64>,
    pub parameters: BTreeMap<String, String>,
    pub results: Vec<ResultRef>,
    pub error_summary: Option<String>,
}

impl Job {
    pub fn new(job_id: impl Into<String>, url: impl Into<String>, format: OutputFormat) -> Self {
        Self {
            job_id: job_id.into(),
            url: url.into().trim_end_matches('/').to_string(),
            phase: JobPhase::Queued,
            format,
            query: None,
            upload: None,
            owner: None,
            run_id: None,
            creation_time: None,
            start_time: None,
            end_time: None,
            execution_duration: None,
            parameters: BTreeMap::new(),
            results: Vec::new(),
            error_summary: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn phase_url(&self) -> String {
        format!("{}/phase", self.url)
    }

    pub fn error_url(&self) -> String {
        format!("{}/error", self.url)
    }

    /// Location of the main result document.
    ///
    /// Uses the `result` entry the server listed, falling back to the
    /// standard `{job}/results/result`.
    pub fn result_url(&self) -> String {
        self.results
            .iter()
            .find(|r| r.id == "result")
            .or_else(|| self.results.first())
            .map(|r| r.href.clone())
            .unwrap_or_else(|| format!("{}/results/result", self.url))
    }

    /// Build a job from a UWS job document.
    ///
    /// `url` is the job resource the document was fetched from. The result
    /// format comes from the job's `FORMAT` parameter when present, else
    /// `default_format`.
    pub fn from_uws(bytes: &[u8], url: &str, default_format: OutputFormat) -> TapResult<Job> {
        let root = xml::parse(bytes, "UWS job")?;
        if root.name != "job" {
            return Err(TapError::document(
                "UWS job",
                format!("root element is <{}>, expected <job>", root.name),
            ));
        }
        let job_id = root
            .child_text("jobId")
            .ok_or_else(|| TapError::document("UWS job", "missing jobId"))?;

        let mut parameters = BTreeMap::new();
        if let Some(params) = root.child("parameters") {
            for p in params.children_named("parameter") {
                if let Some(id) = p.attr("id") {
                    parameters.insert(id.to_ascii_lowercase(), p.text.trim().to_string());
                }
            }
        }

        let format = parameters
            .get("format")
            .and_then(|f| f.parse::<OutputFormat>().ok())
            .unwrap_or(default_format);

        let results = root
            .child("results")
            .map(|r| {
                r.children_named("result")
                    .filter_map(|e| {
                        Some(ResultRef {
                            id: e.attr("id").unwrap_or("result").to_string(),
                            href: e.attr("href")?.to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let error_summary = root.child("errorSummary").and_then(|e| {
            e.child_text("message")
                .or_else(|| Some(e.text.trim().to_string()).filter(|t| !t.is_empty()))
        });

        let mut job = Job::new(job_id, url, format);
        job.phase = root
            .child_text("phase")
            .map(|p| JobPhase::parse_reported(&p))
            .unwrap_or(JobPhase::Unknown);
        job.query = parameters.get("query").cloned();
        job.upload = parameters.get("upload").cloned();
        job.owner = root.child_text("ownerId");
        job.run_id = root.child_text("runId");
        job.creation_time = child_time(&root, "creationTime");
        job.start_time = child_time(&root, "startTime");
        job.end_time = child_time(&root, "endTime");
        job.execution_duration = root
            .child_text("executionDuration")
            .and_then(|d| d.parse().ok());
        job.parameters = parameters;
        job.results = results;
        job.error_summary = error_summary;
        Ok(job)
    }
}

/// Entry of the job list returned by `GET {tap}/async`.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSummary {
    pub job_id: String,
    pub phase: JobPhase,
    pub href: Option<String>,
    pub owner: Option<String>,
    pub creation_time: Option<DateTime<Utc>>,
}

/// Parse a UWS job list.
pub fn parse_job_list(bytes: &[u8]) -> TapResult<Vec<JobSummary>> {
    let root = xml::parse(bytes, "UWS job list")?;
    if root.name != "jobs" {
        return Err(TapError::document(
            "UWS job list",
            format!("root element is <{}>, expected <jobs>", root.name),
        ));
    }
    root.children_named("jobref")
        .map(|r| {
            let job_id = r
                .attr("id")
                .map(str::to_string)
                .ok_or_else(|| TapError::document("UWS job list", "jobref without id"))?;
            Ok(JobSummary {
                job_id,
                phase: r
                    .child_text("phase")
                    .map(|p| JobPhase::parse_reported(&p))
                    .unwrap_or(JobPhase::Unknown),
                href: r.attr("href").map(str::to_string),
                owner: r.child_text("ownerId"),
                creation_time: child_time(r, "creationTime"),
            })
        })
        .collect()
}

fn child_time(element: &Element, name: &str) -> Option<DateTime<Utc>> {
    element.child_text(name).and_then(|t| parse_time(&t))
}

/// UWS timestamps are ISO 8601, with or without an offset.
pub(crate) fn parse_time(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
