//! The generic TAP/TAP+ client.
//!
//! One [`TapClient`] talks to one service, described by the
//! [`ServiceConfig`] inside its [`TapConfig`]. All calls are blocking and
//! nothing is retried.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use tap::{Archive, PollPolicy, QueryRequest, TapClient};
//!
//! let client = TapClient::for_archive(Archive::Gaia)?;
//!
//! // Small queries run synchronously
//! let table = client.launch_job(&QueryRequest::new(
//!     "SELECT TOP 10 source_id, ra, dec FROM gaiadr3.gaia_source",
//! ))?;
//! println!("{table}");
//!
//! // Large ones run as jobs on the server
//! let mut job = client.launch_job_async(&QueryRequest::new(
//!     "SELECT source_id, ra, dec FROM gaiadr3.gaia_source WHERE phot_g_mean_mag < 12",
//! ))?;
//! client.wait_for_job(&mut job, &PollPolicy::default().with_timeout(Duration::from_secs(600)))?;
//! let results = client.fetch_results(&job)?;
//! println!("{} rows", results.num_rows());
//! # Ok::<(), tap::TapError>(())
//! ```

use std::path::Path;

use tracing::{debug, info, warn};
use url::Url;
use votable::{read_table, OutputFormat, QueryStatus, Table};

use crate::cache::ResponseCache;
use crate::config::TapConfig;
use crate::error::{TapError, TapResult};
use crate::http::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
use crate::job::{parse_job_list, Job, JobPhase, JobSummary};
use crate::poller::{Clock, JobPoller, PollAction, PollPolicy, SystemClock};
use crate::request::QueryRequest;
use crate::services::{Archive, EmptyResultPolicy, ServiceConfig};
use crate::session::Session;
use crate::tables::{parse_tableset, TableMeta, TablesQuery};

pub struct TapClient {
    config: TapConfig,
    pub(crate) transport: Box<dyn Transport>,
    clock: Box<dyn Clock>,
    pub(crate) session: Option<Session>,
    cache: Option<ResponseCache>,
}

impl TapClient {
    /// Client talking to the network.
    pub fn new(config: TapConfig) -> TapResult<Self> {
        let transport = ReqwestTransport::new(&config.user_agent, config.request_timeout)?;
        Self::with_transport(config, transport)
    }

    pub fn for_archive(archive: Archive) -> TapResult<Self> {
        Self::new(TapConfig::for_archive(archive))
    }

    /// Client sending its requests through `transport`.
    pub fn with_transport(config: TapConfig, transport: impl Transport + 'static) -> TapResult<Self> {
        config.validate()?;
        let cache = if config.cache.enabled {
            Some(match &config.cache.dir {
                Some(dir) => ResponseCache::with_path(dir.clone()),
                None => ResponseCache::new()?,
            })
        } else {
            None
        };
        Ok(Self {
            config,
            transport: Box::new(transport),
            clock: Box::new(SystemClock),
            session: None,
            cache,
        })
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &TapConfig {
        &self.config
    }

    pub fn service(&self) -> &ServiceConfig {
        &self.config.service
    }

    pub fn cache(&self) -> Option<&ResponseCache> {
        self.cache.as_ref()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Run a query synchronously and return its result table.
    ///
    /// The result never holds more rows than the smaller of the requested
    /// or configured limit and the service's synchronous cap.
    pub fn launch_job(&self, request: &QueryRequest) -> TapResult<Table> {
        request.validate()?;
        let format = self.resolve_format(request)?;
        let cap = self.config.sync_row_cap(request.max_rec);

        let sync_url = self.service().sync_url();
        let http = request.build(&sync_url, format, cap, false)?;
        info!("Launching synchronous query on {}", self.service().name);
        debug!(query = %request.query, %format, ?cap);
        let response = self.send(http, true)?;
        let response = self.follow_redirect(response, &sync_url)?;
        if !response.is_success() {
            return Err(self.error_from_response(&response, None));
        }

        let mut table = self.parse_result(&response.body, format, None)?;
        if let Some(cap) = cap {
            if table.truncate(cap as usize) {
                warn!("Result truncated to {cap} rows");
            }
        }
        self.check_empty(table)
    }

    /// Submit a query as an asynchronous job and return without waiting.
    pub fn launch_job_async(&self, request: &QueryRequest) -> TapResult<Job> {
        request.validate()?;
        let format = self.resolve_format(request)?;
        let limit = request.max_rec.or(self.config.row_limit);
        let http = request.build(&self.service().async_url(), format, limit, true)?;
        let upload = http.param_value("UPLOAD").map(str::to_string);

        let response = self.send(http, false)?;
        let mut job = if response.is_redirect() {
            let location = response.header("location").ok_or_else(|| {
                TapError::document("UWS job", "job redirect without a Location header")
            })?;
            let url = Url::parse(&self.service().async_url())?.join(location)?;
            let job_id = url
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .ok_or_else(|| {
                    TapError::document("UWS job", format!("no job id in location '{url}'"))
                })?;
            let mut job = Job::new(job_id, url.as_str(), format);
            job.query = Some(request.query.trim().to_string());
            job
        } else if response.is_success() {
            let mut job = Job::from_uws(&response.body, "", format)?;
            job.url = self.service().job_url(&job.job_id);
            job.format = format;
            job.query.get_or_insert_with(|| request.query.trim().to_string());
            job
        } else {
            return Err(self.error_from_response(&response, None));
        };
        job.upload = job.upload.or(upload);

        info!("Submitted job {} to {}", job.job_id, self.service().name);
        Ok(job)
    }

    /// Submit, wait for completion under the configured poll policy and
    /// fetch the results.
    pub fn run_async(&self, request: &QueryRequest) -> TapResult<Table> {
        let mut job = self.launch_job_async(request)?;
        self.wait_for_job(&mut job, &self.config.poll)?;
        self.fetch_results(&job)
    }

    fn resolve_format(&self, request: &QueryRequest) -> TapResult<OutputFormat> {
        let format = request.format.unwrap_or(self.service().default_format);
        self.service().require_format(format)?;
        Ok(format)
    }

    // =========================================================================
    // Jobs
    // =========================================================================

    /// Re-attach to a job submitted earlier, possibly by another process.
    pub fn load_async_job(&self, job_id: &str) -> TapResult<Job> {
        let url = self.service().job_url(job_id);
        let response = self.send(HttpRequest::get(url.as_str()), false)?;
        if !response.is_success() {
            return Err(self.error_from_response(&response, Some(job_id)));
        }
        Job::from_uws(&response.body, &url, self.service().default_format)
    }

    /// Ask the server for the current phase of a job.
    pub fn job_phase(&self, job: &Job) -> TapResult<JobPhase> {
        let response = self.send(HttpRequest::get(job.phase_url()), false)?;
        if !response.is_success() {
            return Err(self.error_from_response(&response, Some(&job.job_id)));
        }
        Ok(JobPhase::parse_reported(&response.text()))
    }

    /// Poll until the job reaches a terminal phase.
    ///
    /// Returns `Ok` only for COMPLETED. On timeout the job is left running on
    /// the server and can be picked up again with [`Self::load_async_job`].
    pub fn wait_for_job(&self, job: &mut Job, policy: &PollPolicy) -> TapResult<()> {
        policy.validate()?;
        let mut poller = JobPoller::new(policy.clone(), self.clock.now());
        loop {
            match poller.observe(job.phase, self.clock.now()) {
                PollAction::Done(_) => break,
                PollAction::Sleep(wait) => {
                    self.clock.sleep(wait);
                    let phase = self.job_phase(job)?;
                    if phase != job.phase {
                        debug!(job_id = %job.job_id, %phase, "job phase changed");
                    }
                    job.phase = phase;
                }
                PollAction::TimedOut(elapsed) => {
                    warn!(
                        "Gave up waiting for job {} after {:?}; it keeps running on the server",
                        job.job_id, elapsed
                    );
                    return Err(TapError::Timeout {
                        job_id: job.job_id.clone(),
                        elapsed,
                    });
                }
            }
        }

        match job.phase {
            JobPhase::Completed => {
                info!("Job {} completed", job.job_id);
                Ok(())
            }
            JobPhase::Error => Err(self.job_error(job)),
            JobPhase::Aborted => Err(TapError::JobAborted {
                job_id: job.job_id.clone(),
            }),
            phase => Err(TapError::JobNotCompleted {
                job_id: job.job_id.clone(),
                phase,
            }),
        }
    }

    /// Error message of a failed job, from `{job}/error` or else the job's
    /// `errorSummary`.
    fn job_error(&self, job: &Job) -> TapError {
        let from_endpoint = self
            .send(HttpRequest::get(job.error_url()), false)
            .ok()
            .filter(HttpResponse::is_success)
            .and_then(|response| extract_error_message(&response.body));
        let message = from_endpoint
            .or_else(|| job.error_summary.clone())
            .or_else(|| {
                self.load_async_job(&job.job_id)
                    .ok()
                    .and_then(|j| j.error_summary)
            })
            .unwrap_or_else(|| "job failed without an error message".to_string());
        warn!("Job {} failed: {message}", job.job_id);
        TapError::QueryFailed {
            job_id: Some(job.job_id.clone()),
            message,
        }
    }

    /// Download and parse the results of a completed job.
    pub fn fetch_results(&self, job: &Job) -> TapResult<Table> {
        let body = self.result_bytes(job)?;
        let table = self.parse_result(&body, job.format, Some(&job.job_id))?;
        self.check_empty(table)
    }

    /// Write the raw result document of a completed job to `path`.
    /// Returns the number of bytes written.
    pub fn save_results(&self, job: &Job, path: &Path) -> TapResult<u64> {
        let body = self.result_bytes(job)?;
        std::fs::write(path, &body)?;
        info!("Saved results of job {} to {}", job.job_id, path.display());
        Ok(body.len() as u64)
    }

    fn result_bytes(&self, job: &Job) -> TapResult<Vec<u8>> {
        if job.phase != JobPhase::Completed {
            return Err(TapError::JobNotCompleted {
                job_id: job.job_id.clone(),
                phase: job.phase,
            });
        }
        let result_url = job.result_url();
        let response = self.send(HttpRequest::get(result_url.as_str()), false)?;
        let response = self.follow_redirect(response, &result_url)?;
        if !response.is_success() {
            return Err(self.error_from_response(&response, Some(&job.job_id)));
        }
        Ok(response.body)
    }

    /// Jobs the service lists for this client (the session's jobs on TAP+).
    pub fn list_async_jobs(&self) -> TapResult<Vec<JobSummary>> {
        let response = self.send(HttpRequest::get(self.service().async_url()), false)?;
        if !response.is_success() {
            return Err(self.error_from_response(&response, None));
        }
        parse_job_list(&response.body)
    }

    /// Ask the server to abort a job, then refresh its phase.
    pub fn abort_job(&self, job: &mut Job) -> TapResult<()> {
        let request = HttpRequest::post(job.phase_url()).param("PHASE", "ABORT");
        let response = self.send(request, false)?;
        if !response.is_success() && !response.is_redirect() {
            return Err(self.error_from_response(&response, Some(&job.job_id)));
        }
        job.phase = self.job_phase(job)?;
        info!("Aborted job {} ({})", job.job_id, job.phase);
        Ok(())
    }

    /// Remove a job and its results from the server.
    pub fn delete_job(&self, job_id: &str) -> TapResult<()> {
        let request = HttpRequest::post(self.service().job_url(job_id)).param("ACTION", "DELETE");
        let response = self.send(request, false)?;
        if !response.is_success() && !response.is_redirect() {
            return Err(self.error_from_response(&response, Some(job_id)));
        }
        info!("Deleted job {job_id}");
        Ok(())
    }

    // =========================================================================
    // Table metadata
    // =========================================================================

    pub fn load_tables(&self, query: &TablesQuery) -> TapResult<Vec<TableMeta>> {
        let request = HttpRequest::get(self.service().tables_url()).params(query.params());
        let response = self.send(request, true)?;
        if !response.is_success() {
            return Err(self.error_from_response(&response, None));
        }
        let tables = parse_tableset(&response.body)?;
        debug!(count = tables.len(), "loaded table metadata");
        Ok(tables)
    }

    pub fn load_table(&self, name: &str) -> TapResult<TableMeta> {
        let tables = self.load_tables(&TablesQuery::table(name))?;
        let wanted = name.trim();
        let unqualified = wanted.rsplit('.').next().unwrap_or(wanted);
        tables
            .into_iter()
            .find(|t| {
                t.name.eq_ignore_ascii_case(wanted)
                    || t.name
                        .rsplit('.')
                        .next()
                        .is_some_and(|n| n.eq_ignore_ascii_case(unqualified))
            })
            .ok_or_else(|| {
                TapError::InvalidInput(format!(
                    "table '{wanted}' not found on {}",
                    self.service().name
                ))
            })
    }

    // =========================================================================
    // Plumbing
    // =========================================================================

    /// Execute a request with the session cookie attached.
    ///
    /// `cacheable` responses are served from and stored in the cache, but
    /// only while no session is active.
    pub(crate) fn send(&self, request: HttpRequest, cacheable: bool) -> TapResult<HttpResponse> {
        let request = request.cookie(self.session.as_ref().map(|s| s.cookie.header_value()));
        let cache = self
            .cache
            .as_ref()
            .filter(|_| cacheable && self.session.is_none() && !request.is_multipart());

        if let Some(cache) = cache {
            if let Some(body) = cache.get(&request) {
                return Ok(HttpResponse::new(200, body));
            }
        }

        let response = self.transport.execute(&request)?;
        if let Some(cache) = cache {
            if response.is_success() {
                if let Err(e) = cache.put(&request, &response.body) {
                    warn!("Failed to cache response from {}: {e}", request.url);
                }
            }
        }
        Ok(response)
    }

    /// Follow one redirect to the stored result document. Services answer
    /// `/sync` and result requests with a 303 pointing at the file.
    fn follow_redirect(&self, response: HttpResponse, base: &str) -> TapResult<HttpResponse> {
        if !response.is_redirect() {
            return Ok(response);
        }
        let Some(location) = response.header("location") else {
            return Ok(response);
        };
        let target = Url::parse(base)?.join(location)?;
        debug!(%target, "following redirect");
        self.send(HttpRequest::get(target.as_str()), false)
    }

    /// Turn a non-success response into the most specific error.
    pub(crate) fn error_from_response(
        &self,
        response: &HttpResponse,
        job_id: Option<&str>,
    ) -> TapError {
        if matches!(response.status, 401 | 403) {
            return TapError::AuthenticationFailed(format!(
                "{} refused the request (status {})",
                self.service().name,
                response.status
            ));
        }
        match extract_error_message(&response.body) {
            Some(message) if response.status < 500 => TapError::QueryFailed {
                job_id: job_id.map(str::to_string),
                message,
            },
            other => TapError::ServerStatus {
                status: response.status,
                message: other.unwrap_or_else(|| format!("empty response from {}", self.service().name)),
            },
        }
    }

    fn parse_result(
        &self,
        body: &[u8],
        format: OutputFormat,
        job_id: Option<&str>,
    ) -> TapResult<Table> {
        let table = read_table(format, body)?;
        match table.query_status() {
            QueryStatus::Error(message) => {
                return Err(TapError::QueryFailed {
                    job_id: job_id.map(str::to_string),
                    message,
                })
            }
            QueryStatus::Overflow => {
                warn!(
                    "Query hit the row limit, only {} rows were returned",
                    table.num_rows()
                );
            }
            QueryStatus::Ok => {}
        }
        Ok(table)
    }

    fn check_empty(&self, table: Table) -> TapResult<Table> {
        if !table.is_empty() {
            return Ok(table);
        }
        match self.service().empty_result {
            EmptyResultPolicy::Warn => {
                warn!("Query returned no rows");
                Ok(table)
            }
            EmptyResultPolicy::Error => Err(TapError::EmptyResult),
        }
    }
}

/// Error text of a failure response: the `QUERY_STATUS` message of a VOTable
/// error document, or else the trimmed body.
fn extract_error_message(body: &[u8]) -> Option<String> {
    if let Ok(table) = votable::votable::read(body) {
        if let QueryStatus::Error(message) = table.query_status() {
            return Some(message);
        }
    }
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    const MAX: usize = 500;
    Some(match text.char_indices().nth(MAX) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    })
}
