//! In-process fake TAP+ archive used by the integration tests.
//!
//! Understands just enough of the protocol to run `SELECT * FROM <table>`
//! queries synchronously and as jobs, log users in and accept uploads.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tap::http::{FileContent, HttpRequest, HttpResponse, Method, Transport};
use tap::mock::{uws_job, votable_error};
use tap::{Archive, ServiceConfig, TapResult};
use votable::{ColumnMeta, DataType, Info, Table, Value};

pub const PASSWORD: &str = "secret";

#[derive(Debug)]
struct FakeJob {
    polls_left: usize,
    result: Result<Table, String>,
}

#[derive(Debug, Default)]
struct State {
    next_job: u64,
    jobs: HashMap<String, FakeJob>,
    tables: HashMap<String, Table>,
    sessions: HashMap<String, String>,
    polls_to_complete: usize,
    log: Vec<HttpRequest>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeArchive {
    state: Arc<Mutex<State>>,
}

/// Numbered stars, `source_id` 1..=n with magnitudes.
pub fn star_table(rows: usize) -> Table {
    let mut table = Table::new(vec![
        ColumnMeta::new("source_id", DataType::Long).with_ucd("meta.id"),
        ColumnMeta::new("phot_g_mean_mag", DataType::Double).with_unit("mag"),
    ]);
    for i in 1..=rows {
        table
            .push_row(vec![Value::Int(i as i64), Value::Float(10.0 + i as f64 / 100.0)])
            .unwrap();
    }
    table
}

impl FakeArchive {
    pub fn new() -> Self {
        let archive = Self::default();
        archive.add_table("public.stars", star_table(3));
        archive.add_table("public.big", star_table(2500));
        archive.add_table("public.nothing", star_table(0));
        archive
    }

    /// Gaia-like service description pointing at this fake.
    pub fn service() -> ServiceConfig {
        let mut service = Archive::Gaia.config();
        service.name = "fake".to_string();
        service
    }

    pub fn add_table(&self, name: &str, table: Table) {
        self.state().tables.insert(name.to_string(), table);
    }

    pub fn table(&self, name: &str) -> Option<Table> {
        self.state().tables.get(name).cloned()
    }

    /// Number of phase requests a job answers EXECUTING before COMPLETED.
    pub fn set_polls_to_complete(&self, polls: usize) {
        self.state().polls_to_complete = polls;
    }

    /// Let every submitted job complete on its next phase request.
    pub fn finish_jobs(&self) {
        for job in self.state().jobs.values_mut() {
            job.polls_left = 0;
        }
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.state().log.clone()
    }

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

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }
}

fn evaluate(state: &State, query: &str) -> Result<Table, String> {
    let tokens: Vec<&str> = query.split_whitespace().collect();
    let from = tokens
        .iter()
        .position(|t| t.eq_ignore_ascii_case("FROM"))
        .ok_or_else(|| "Incorrect ADQL query: missing FROM".to_string())?;
    let name = tokens
        .get(from + 1)
        .ok_or_else(|| "Incorrect ADQL query: missing table".to_string())?;
    state
        .tables
        .get(*name)
        .cloned()
        .ok_or_else(|| format!("Table '{name}' does not exist"))
}

fn user_of(state: &State, request: &HttpRequest) -> Option<String> {
    let cookie = request.cookie.as_deref()?;
    let value = cookie.strip_prefix("JSESSIONID=")?;
    state.sessions.get(value).cloned()
}

impl Transport for FakeArchive {
    fn execute(&self, request: &HttpRequest) -> TapResult<HttpResponse> {
        let mut state = self.state();
        state.log.push(request.clone());
        let url = request.url.as_str();

        let response = if url.ends_with("/login") {
            let user = request.param_value("username").unwrap_or_default().to_string();
            if request.param_value("password") == Some(PASSWORD) {
                let token = format!("token-{user}");
                state.sessions.insert(token.clone(), user);
                HttpResponse::new(200, "OK")
                    .with_header("Set-Cookie", format!("JSESSIONID={token}; Path=/; HttpOnly"))
            } else {
                HttpResponse::new(401, "Bad credentials")
            }
        } else if url.ends_with("/logout") {
            if let Some(token) = request
                .cookie
                .as_deref()
                .and_then(|c| c.strip_prefix("JSESSIONID="))
            {
                state.sessions.remove(token);
            }
            HttpResponse::new(200, "")
        } else if url.ends_with("/tap/sync") {
            match evaluate(&state, request.param_value("QUERY").unwrap_or_default()) {
                Ok(mut table) => {
                    let max_rec = request
                        .param_value("MAXREC")
                        .and_then(|m| m.parse::<usize>().ok());
                    if let Some(max_rec) = max_rec {
                        if table.truncate(max_rec) {
                            table.add_info(Info {
                                name: "QUERY_STATUS".into(),
                                value: "OVERFLOW".into(),
                                content: None,
                            });
                        }
                    }
                    HttpResponse::new(200, table.to_votable())
                }
                Err(message) => HttpResponse::new(400, votable_error(&message)),
            }
        } else if url.ends_with("/tap/async") && request.method == Method::Post {
            state.next_job += 1;
            let id = format!("{}O", 1_700_000_000_000u64 + state.next_job);
            let result = evaluate(&state, request.param_value("QUERY").unwrap_or_default());
            let polls_left = state.polls_to_complete;
            state.jobs.insert(id.clone(), FakeJob { polls_left, result });
            HttpResponse::new(303, "")
                .with_header("Location", format!("https://gea.esac.esa.int/tap-server/tap/async/{id}"))
        } else if url.ends_with("/Upload") {
            match user_of(&state, request) {
                None => HttpResponse::new(401, "Not logged in"),
                Some(user) => {
                    let name = request.param_value("TABLE_NAME").unwrap_or_default().to_string();
                    let body = request.files.iter().find_map(|f| match &f.content {
                        FileContent::Bytes(b) => Some(b.clone()),
                        FileContent::Path(p) => std::fs::read(p).ok(),
                    });
                    match body.map(|b| votable::votable::read(&b)) {
                        Some(Ok(table)) => {
                            state.tables.insert(format!("user_{user}.{name}"), table);
                            HttpResponse::new(200, "Table uploaded")
                        }
                        _ => HttpResponse::new(400, "Invalid upload"),
                    }
                }
            }
        } else if let Some(rest) = url.split("/tap/async/").nth(1) {
            let mut parts = rest.splitn(2, '/');
            let id = parts.next().unwrap_or_default().to_string();
            let tail = parts.next().unwrap_or_default();
            match state.jobs.get_mut(&id) {
                None => HttpResponse::new(404, format!("Job {id} not found")),
                Some(job) => {
                    let phase = match (&job.result, job.polls_left) {
                        (_, n) if n > 0 => "EXECUTING",
                        (Ok(_), _) => "COMPLETED",
                        (Err(_), _) => "ERROR",
                    };
                    match tail {
                        "phase" => {
                            job.polls_left = job.polls_left.saturating_sub(1);
                            HttpResponse::new(200, phase)
                        }
                        "results/result" => match &job.result {
                            Ok(table) if job.polls_left == 0 => {
                                HttpResponse::new(200, table.to_votable())
                            }
                            _ => HttpResponse::new(404, "No results"),
                        },
                        "error" => match &job.result {
                            Err(message) => HttpResponse::new(200, message.clone()),
                            Ok(_) => HttpResponse::new(404, ""),
                        },
                        "" => HttpResponse::new(200, uws_job(&id, phase)),
                        _ => HttpResponse::new(404, "unknown resource"),
                    }
                }
            }
        } else {
            HttpResponse::new(404, "unknown resource")
        };
        Ok(response)
    }
}
