//! Generic client for IVOA Table Access Protocol services.
//!
//! Every archive is served by the same [`TapClient`]; what differs between
//! archives is data, the endpoint table in [`ServiceConfig`]. Built-in
//! tables exist for the archives in [`Archive`], and any other TAP service
//! works from its base URL with [`ServiceConfig::custom`].
//!
//! - Synchronous queries ([`TapClient::launch_job`]) block and return a
//!   [`Table`], capped at the service's synchronous row limit.
//! - Asynchronous queries ([`TapClient::launch_job_async`]) return a [`Job`]
//!   that is polled with [`TapClient::wait_for_job`] under a [`PollPolicy`].
//! - TAP+ services (the ESA archives) add login, user table management and
//!   table sharing; see [`TapClient::login`] and [`TapClient::upload_table`].
//!
//! Results are parsed by the `votable` crate in whatever format was
//! requested.

pub mod adql;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod job;
pub mod mock;
pub mod poller;
pub mod request;
pub mod services;
pub mod session;
pub mod tables;
pub mod user_tables;
mod xml;

pub use adql::{Coordinate, PositionalSearch};
pub use cache::ResponseCache;
pub use client::TapClient;
pub use config::{CacheConfig, TapConfig};
pub use error::{TapError, TapResult};
pub use job::{Job, JobPhase, JobSummary};
pub use poller::{Clock, JobPoller, PollAction, PollPolicy, SystemClock};
pub use request::{QueryRequest, UploadSource};
pub use services::{Archive, EmptyResultPolicy, ServiceConfig};
pub use session::{Credentials, Session};
pub use tables::{TableMeta, TableName, TablesQuery};
pub use user_tables::{ColumnFlag, ColumnUpdate, Group};
pub use votable::{OutputFormat, Table, Value};
