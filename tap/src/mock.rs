//! Scripted transport and clock for tests.
//!
//! [`MockTransport`] answers requests from canned responses routed by method
//! and URL suffix, and records every request it sees. [`FakeClock`] only
//! moves when something sleeps on it, so poll loops run instantly.
//!
//! ```
//! use tap::mock::{uws_job, MockTransport};
//! use tap::http::{HttpResponse, Method};
//!
//! let mock = MockTransport::new();
//! mock.on(Method::Get, "/async/42/phase", HttpResponse::new(200, "EXECUTING"))
//!     .on(Method::Get, "/async/42/phase", HttpResponse::new(200, "COMPLETED"))
//!     .on(Method::Get, "/async/42", HttpResponse::new(200, uws_job("42", "COMPLETED")));
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::TapResult;
use crate::http::{HttpRequest, HttpResponse, Method, Transport};
use crate::poller::Clock;

#[derive(Debug)]
struct Route {
    method: Method,
    suffix: String,
    responses: VecDeque<HttpResponse>,
}

#[derive(Debug, Default)]
struct MockState {
    routes: Vec<Route>,
    log: Vec<HttpRequest>,
}

/// Transport answering from a script.
///
/// Responses registered for the same route are returned in order; the last
/// one repeats forever. When several routes match, the longest suffix wins.
/// Unrouted requests get a `404`.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a response for requests with this method whose URL ends with `suffix`.
    pub fn on(&self, method: Method, suffix: &str, response: HttpResponse) -> &Self {
        let mut state = self.state();
        match state
            .routes
            .iter_mut()
            .find(|r| r.method == method && r.suffix == suffix)
        {
            Some(route) => route.responses.push_back(response),
            None => state.routes.push(Route {
                method,
                suffix: suffix.to_string(),
                responses: VecDeque::from([response]),
            }),
        }
        self
    }

    /// Every request executed so far, oldest first.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.state().log.clone()
    }

    pub fn last_request(&self) -> Option<HttpRequest> {
        self.state().log.last().cloned()
    }

    /// Number of requests with this method whose URL ends with `suffix`.
    pub fn count(&self, method: Method, suffix: &str) -> usize {
        self.state()
            .log
            .iter()
            .filter(|r| r.method == method && r.url.ends_with(suffix))
            .count()
    }

    pub fn total(&self) -> usize {
        self.state().log.len()
    }

    pub fn clear_log(&self) {
        self.state().log.clear();
    }
}

impl Transport for MockTransport {
    fn execute(&self, request: &HttpRequest) -> TapResult<HttpResponse> {
        let mut state = self.state();
        state.log.push(request.clone());
        let route = state
            .routes
            .iter_mut()
            .filter(|r| r.method == request.method && request.url.ends_with(&r.suffix))
            .max_by_key(|r| r.suffix.len());
        let response = match route {
            Some(route) if route.responses.len() > 1 => route.responses.pop_front(),
            Some(route) => route.responses.front().cloned(),
            None => None,
        };
        Ok(response.unwrap_or_else(|| HttpResponse::new(404, "no route")))
    }
}

/// Clock that advances only when slept on.
#[derive(Debug, Clone)]
pub struct FakeClock {
    start: Instant,
    offset: Arc<Mutex<Duration>>,
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
            sleeps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn advance(&self, duration: Duration) {
        *self.offset.lock().unwrap_or_else(|e| e.into_inner()) += duration;
    }

    /// Total time slept or advanced.
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every sleep requested, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(duration);
        self.advance(duration);
    }
}

/// A minimal UWS job document.
pub fn uws_job(job_id: &str, phase: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<uws:job xmlns:uws="http://www.ivoa.net/xml/UWS/v1.0" xmlns:xlink="http://www.w3.org/1999/xlink">
  <uws:jobId>{job_id}</uws:jobId>
  <uws:ownerId xsi:nil="true"/>
  <uws:phase>{phase}</uws:phase>
  <uws:parameters/>
  <uws:results/>
</uws:job>"#
    )
}

/// A VOTable document with one `QUERY_STATUS=ERROR` info, as TAP services
/// return for failed queries.
pub fn votable_error(message: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<VOTABLE version="1.4" xmlns="http://www.ivoa.net/xml/VOTable/v1.3">
  <RESOURCE type="results">
    <INFO name="QUERY_STATUS" value="ERROR">{message}</INFO>
  </RESOURCE>
</VOTABLE>"#
    )
}
