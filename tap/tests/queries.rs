//! Query and job lifecycle against a fake archive.

mod common;

use std::io;
use std::net::TcpListener;
use std::time::Duration;

use common::{star_table, FakeArchive};
use tap::http::{HttpRequest, HttpResponse, Method, ReqwestTransport, Transport};
use tap::mock::{FakeClock, MockTransport};
use tap::{
    EmptyResultPolicy, JobPhase, OutputFormat, PollPolicy, QueryRequest, ServiceConfig,
    TapClient, TapConfig, TapError, TapResult,
};
use votable::TableError;

fn client_for(archive: &FakeArchive, config: TapConfig) -> (TapClient, FakeClock) {
    let clock = FakeClock::new();
    let client = TapClient::with_transport(config, archive.clone())
        .unwrap()
        .with_clock(clock.clone());
    (client, clock)
}

fn client(archive: &FakeArchive) -> (TapClient, FakeClock) {
    client_for(archive, TapConfig::new(FakeArchive::service()))
}

#[test]
fn test_sync_results_respect_service_cap() {
    let archive = FakeArchive::new();
    let (client, _) = client(&archive);

    let table = client
        .launch_job(&QueryRequest::new("SELECT * FROM public.big"))
        .unwrap();
    assert_eq!(table.num_rows(), 2000);
    let sent = archive.requests().pop().unwrap();
    assert_eq!(sent.param_value("MAXREC"), Some("2000"));
}

#[test]
fn test_sync_results_respect_configured_limit() {
    let archive = FakeArchive::new();
    let config = TapConfig::new(FakeArchive::service()).with_row_limit(25);
    let (client, _) = client_for(&archive, config);

    let table = client
        .launch_job(&QueryRequest::new("SELECT * FROM public.big"))
        .unwrap();
    assert_eq!(table.num_rows(), 25);

    // A per-query limit can go lower but never above the service cap
    let table = client
        .launch_job(&QueryRequest::new("SELECT * FROM public.big").max_rec(5))
        .unwrap();
    assert_eq!(table.num_rows(), 5);
    let table = client
        .launch_job(&QueryRequest::new("SELECT * FROM public.big").max_rec(100_000))
        .unwrap();
    assert_eq!(table.num_rows(), 2000);
}

#[test]
fn test_uncapped_service_returns_everything() {
    let archive = FakeArchive::new();
    let service = ServiceConfig::custom("plain", "https://gea.esac.esa.int/tap-server/tap");
    let (client, _) = client_for(&archive, TapConfig::new(service));

    let table = client
        .launch_job(&QueryRequest::new("SELECT * FROM public.big"))
        .unwrap();
    assert_eq!(table.num_rows(), 2500);
    assert_eq!(archive.requests()[0].param_value("MAXREC"), None);
}

#[test]
fn test_repeated_async_submissions_get_distinct_jobs() {
    let archive = FakeArchive::new();
    let (client, _) = client(&archive);
    let request = QueryRequest::new("SELECT * FROM public.stars");

    let first = client.launch_job_async(&request).unwrap();
    let second = client.launch_job_async(&request).unwrap();
    assert_ne!(first.job_id, second.job_id);
    assert!(matches!(first.phase, JobPhase::Queued | JobPhase::Executing));
    assert_eq!(archive.count(Method::Post, "/tap/async"), 2);
}

#[test]
fn test_async_job_round_trip() {
    let archive = FakeArchive::new();
    archive.set_polls_to_complete(2);
    let (client, clock) = client(&archive);

    let mut job = client
        .launch_job_async(&QueryRequest::new("SELECT * FROM public.stars"))
        .unwrap();
    client
        .wait_for_job(&mut job, &PollPolicy::fixed(Duration::from_secs(2)))
        .unwrap();
    assert_eq!(job.phase, JobPhase::Completed);
    assert_eq!(archive.count(Method::Get, "/phase"), 3);
    assert_eq!(clock.elapsed(), Duration::from_secs(6));

    let table = client.fetch_results(&job).unwrap();
    assert_eq!(table.num_rows(), 3);
    assert_eq!(table.column("phot_g_mean_mag").unwrap().unit.as_deref(), Some("mag"));
}

#[test]
fn test_completed_job_is_not_polled_again() {
    let archive = FakeArchive::new();
    let (client, _) = client(&archive);

    let mut job = client
        .launch_job_async(&QueryRequest::new("SELECT * FROM public.stars"))
        .unwrap();
    client.wait_for_job(&mut job, &PollPolicy::default()).unwrap();
    let polls = archive.count(Method::Get, "/phase");

    client.wait_for_job(&mut job, &PollPolicy::default()).unwrap();
    client.wait_for_job(&mut job, &PollPolicy::default()).unwrap();
    assert_eq!(archive.count(Method::Get, "/phase"), polls);
}

#[test]
fn test_timeout_leaves_job_for_reattach() {
    let archive = FakeArchive::new();
    archive.set_polls_to_complete(100);
    let (client, clock) = client(&archive);

    let mut job = client
        .launch_job_async(&QueryRequest::new("SELECT * FROM public.stars"))
        .unwrap();
    let policy = PollPolicy::fixed(Duration::from_secs(1)).with_timeout(Duration::from_secs(5));
    match client.wait_for_job(&mut job, &policy) {
        Err(TapError::Timeout { job_id, elapsed }) => {
            assert_eq!(job_id, job.job_id);
            assert_eq!(elapsed, Duration::from_secs(5));
        }
        other => panic!("expected a timeout, got {other:?}"),
    }
    assert_eq!(clock.elapsed(), Duration::from_secs(5));
    // The client never asks the server to stop the job
    assert_eq!(archive.count(Method::Post, "/phase"), 0);

    // The job finishes later and is picked up again by id
    archive.finish_jobs();
    let mut reattached = client.load_async_job(&job.job_id).unwrap();
    assert_eq!(reattached.job_id, job.job_id);
    client
        .wait_for_job(&mut reattached, &PollPolicy::default())
        .unwrap();
    assert_eq!(client.fetch_results(&reattached).unwrap().num_rows(), 3);
}

#[test]
fn test_unsupported_format_fails_before_any_request() {
    let archive = FakeArchive::new();
    let mut service = FakeArchive::service();
    service.formats = vec![OutputFormat::Votable];
    let (client, _) = client_for(&archive, TapConfig::new(service));

    let request = QueryRequest::new("SELECT * FROM public.stars").format(OutputFormat::Fits);
    assert!(matches!(
        client.launch_job(&request),
        Err(TapError::UnsupportedFormat { format: OutputFormat::Fits, .. })
    ));
    assert!(matches!(
        client.launch_job_async(&request),
        Err(TapError::UnsupportedFormat { .. })
    ));
    assert!("parquet".parse::<OutputFormat>().is_err());
    assert_eq!(archive.total(), 0);
}

#[test]
fn test_failed_query() {
    let archive = FakeArchive::new();
    let (client, _) = client(&archive);

    match client.launch_job(&QueryRequest::new("SELECT * FROM public.missing")) {
        Err(TapError::QueryFailed { job_id: None, message }) => {
            assert!(message.contains("public.missing"))
        }
        other => panic!("unexpected {other:?}"),
    }

    let mut job = client
        .launch_job_async(&QueryRequest::new("SELECT * FROM public.missing"))
        .unwrap();
    match client.wait_for_job(&mut job, &PollPolicy::default()) {
        Err(TapError::QueryFailed { job_id, message }) => {
            assert_eq!(job_id.as_deref(), Some(job.job_id.as_str()));
            assert!(message.contains("does not exist"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(job.phase, JobPhase::Error);
}

#[test]
fn test_empty_result_policy() {
    let archive = FakeArchive::new();
    let query = QueryRequest::new("SELECT * FROM public.nothing");

    let (lenient, _) = client(&archive);
    assert!(lenient.launch_job(&query).unwrap().is_empty());

    let mut service = FakeArchive::service();
    service.empty_result = EmptyResultPolicy::Error;
    let (strict, _) = client_for(&archive, TapConfig::new(service));
    assert!(matches!(strict.launch_job(&query), Err(TapError::EmptyResult)));
    assert!(matches!(
        strict.run_async(&query),
        Err(TapError::EmptyResult)
    ));
}

#[test]
fn test_save_results() {
    let archive = FakeArchive::new();
    let (client, _) = client(&archive);
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("stars.vot");

    let mut job = client
        .launch_job_async(&QueryRequest::new("SELECT * FROM public.stars"))
        .unwrap();
    client.wait_for_job(&mut job, &PollPolicy::default()).unwrap();
    let bytes = client.save_results(&job, &path).unwrap();

    let saved = std::fs::read(&path).unwrap();
    assert_eq!(saved.len() as u64, bytes);
    assert_eq!(votable::votable::read(&saved).unwrap().num_rows(), 3);
}

#[test]
fn test_run_async_uses_configured_poll_policy() {
    let archive = FakeArchive::new();
    archive.set_polls_to_complete(2);
    let config =
        TapConfig::new(FakeArchive::service()).with_poll(PollPolicy::fixed(Duration::from_secs(3)));
    let (client, clock) = client_for(&archive, config);

    let table = client
        .run_async(&QueryRequest::new("SELECT * FROM public.stars"))
        .unwrap();
    assert_eq!(table.num_rows(), 3);
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(3); 3]);
    assert_eq!(clock.elapsed(), Duration::from_secs(9));
}

const PLAIN_SERVICE: &str = "http://tap.example.org/tap";

fn mock_client(mock: &MockTransport, service: ServiceConfig) -> TapClient {
    TapClient::with_transport(TapConfig::new(service), mock.clone()).unwrap()
}

#[test]
fn test_sync_query_follows_redirect_to_result() {
    let mock = MockTransport::new();
    mock.on(
        Method::Post,
        "/tap/sync",
        HttpResponse::new(303, "").with_header("Location", "/tap/results/q1.vot"),
    )
    .on(
        Method::Get,
        "/tap/results/q1.vot",
        HttpResponse::new(200, star_table(3).to_votable()),
    );
    let client = mock_client(&mock, ServiceConfig::custom("plain", PLAIN_SERVICE));

    let table = client
        .launch_job(&QueryRequest::new("SELECT * FROM public.stars"))
        .unwrap();
    assert_eq!(table.num_rows(), 3);
    assert_eq!(
        mock.last_request().unwrap().url,
        "http://tap.example.org/tap/results/q1.vot"
    );
    assert_eq!(mock.total(), 2);
}

#[test]
fn test_sync_redirect_without_location_is_an_error() {
    let mock = MockTransport::new();
    mock.on(Method::Post, "/tap/sync", HttpResponse::new(303, ""));
    let client = mock_client(&mock, ServiceConfig::custom("plain", PLAIN_SERVICE));

    assert!(matches!(
        client.launch_job(&QueryRequest::new("SELECT 1")),
        Err(TapError::ServerStatus { status: 303, .. })
    ));
}

#[derive(Debug)]
struct Unreachable;

impl Transport for Unreachable {
    fn execute(&self, _request: &HttpRequest) -> TapResult<HttpResponse> {
        Err(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused").into())
    }
}

#[test]
fn test_transport_errors_are_passed_through() {
    let config = TapConfig::new(ServiceConfig::custom("plain", PLAIN_SERVICE));
    let client = TapClient::with_transport(config, Unreachable).unwrap();
    let request = QueryRequest::new("SELECT 1");

    assert!(matches!(
        client.launch_job(&request),
        Err(TapError::Io(e)) if e.kind() == io::ErrorKind::ConnectionRefused
    ));
    assert!(matches!(
        client.launch_job_async(&request),
        Err(TapError::Io(e)) if e.kind() == io::ErrorKind::ConnectionRefused
    ));
}

#[test]
fn test_connection_failure_is_an_http_error() {
    let port = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let service = ServiceConfig::custom("closed", format!("http://127.0.0.1:{port}/tap"));
    let transport = ReqwestTransport::new("tap-tests", Some(Duration::from_secs(5))).unwrap();
    let client = TapClient::with_transport(TapConfig::new(service), transport).unwrap();

    assert!(matches!(
        client.launch_job(&QueryRequest::new("SELECT 1")),
        Err(TapError::Http(_))
    ));
}

#[test]
fn test_malformed_fits_result_is_a_parse_error() {
    let mut fits = format!("{:<80}", "SIMPLE  =                    T").into_bytes();
    fits.resize(2880, b' ');
    fits[87] = 0xC3;
    fits[88] = 0xA9;

    let mock = MockTransport::new();
    mock.on(Method::Post, "/tap/sync", HttpResponse::new(200, fits));
    let client = mock_client(&mock, FakeArchive::service());

    let request = QueryRequest::new("SELECT * FROM public.stars").format(OutputFormat::Fits);
    assert!(matches!(
        client.launch_job(&request),
        Err(TapError::Table(TableError::Malformed { .. }))
    ));
}

#[test]
fn test_malformed_binary_result_is_a_parse_error() {
    let document = r#"<?xml version="1.0"?>
<VOTABLE version="1.4" xmlns="http://www.ivoa.net/xml/VOTable/v1.3">
  <RESOURCE type="results">
    <TABLE>
      <FIELD name="image" datatype="double" arraysize="4294967296x4294967296"/>
      <DATA><BINARY><STREAM encoding="base64">AAAAAAAAAAA=</STREAM></BINARY></DATA>
    </TABLE>
  </RESOURCE>
</VOTABLE>"#;
    let mock = MockTransport::new();
    mock.on(Method::Post, "/tap/sync", HttpResponse::new(200, document));
    let client = mock_client(&mock, ServiceConfig::custom("plain", PLAIN_SERVICE));

    assert!(matches!(
        client.launch_job(&QueryRequest::new("SELECT image FROM public.images")),
        Err(TapError::Table(TableError::Malformed { .. }))
    ));
}
