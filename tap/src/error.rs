//! Error taxonomy for TAP operations.
//!
//! Every operation either returns a structured value or exactly one of these
//! errors. Nothing is retried automatically; the caller decides.

use std::time::Duration;

use thiserror::Error;
use votable::{OutputFormat, TableError};

use crate::job::JobPhase;

/// Errors that can occur while talking to a TAP service.
#[derive(Error, Debug)]
pub enum TapError {
    /// Transport failure (DNS, connection, TLS, I/O on the socket).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with a non-success status that carries no
    /// more specific meaning.
    #[error("Server error (status {status}): {message}")]
    ServerStatus { status: u16, message: String },

    /// The operation needs a logged-in session and there is none.
    ///
    /// Raised locally, before any request is sent.
    #[error("{operation} requires an authenticated session; log in first")]
    AuthenticationRequired { operation: &'static str },

    /// The service rejected the credentials or the session.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The service reported the query as failed (ADQL error, unknown table...).
    #[error("Query failed: {message}")]
    QueryFailed {
        /// Set for asynchronous jobs
        job_id: Option<String>,
        /// Message extracted from the service response
        message: String,
    },

    /// The job ended in the ABORTED phase.
    #[error("Job {job_id} was aborted")]
    JobAborted { job_id: String },

    /// Results were requested from a job that has not completed.
    #[error("Job {job_id} is {phase}, results are only available once COMPLETED")]
    JobNotCompleted { job_id: String, phase: JobPhase },

    /// The query returned no rows and the service is configured to treat
    /// that as an error.
    #[error("Query returned no rows")]
    EmptyResult,

    /// Polling gave up. The job keeps running on the server and can be
    /// re-attached with [`TapClient::load_async_job`](crate::TapClient::load_async_job).
    #[error("Timed out after {elapsed:?} waiting for job {job_id}; it is still running on the server")]
    Timeout { job_id: String, elapsed: Duration },

    /// A result document could not be parsed.
    #[error("Failed to parse result table: {0}")]
    Table(#[from] TableError),

    /// A protocol document (UWS job, VOSI tableset, group list) could not be parsed.
    #[error("Failed to parse {document} document: {message}")]
    Document {
        document: &'static str,
        message: String,
    },

    /// The service does not offer the requested output format.
    #[error("Output format '{format}' is not supported by {service}")]
    UnsupportedFormat {
        format: OutputFormat,
        service: String,
    },

    /// The service has no endpoint for this operation.
    #[error("{operation} is not supported by {service}")]
    Unsupported {
        operation: &'static str,
        service: String,
    },

    /// Caller supplied an invalid argument.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration could not be loaded or is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Local file I/O (uploads, downloads, cache).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TapError {
    pub(crate) fn document(document: &'static str, message: impl Into<String>) -> Self {
        TapError::Document {
            document,
            message: message.into(),
        }
    }
}

impl From<url::ParseError> for TapError {
    fn from(e: url::ParseError) -> Self {
        TapError::InvalidInput(format!("invalid URL: {e}"))
    }
}

/// Result type for TAP operations.
pub type TapResult<T> = Result<T, TapError>;
