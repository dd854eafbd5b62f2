//! Sessions, user tables and caching against a fake TAP+ archive.

mod common;

use common::{star_table, FakeArchive, PASSWORD};
use tap::http::{HttpResponse, Method};
use tap::mock::MockTransport;
use tap::{
    Archive, ColumnFlag, ColumnUpdate, QueryRequest, ResponseCache, TapClient, TapConfig,
    TapError, UploadSource,
};
use votable::Value;

fn client(archive: &FakeArchive) -> TapClient {
    TapClient::with_transport(TapConfig::new(FakeArchive::service()), archive.clone()).unwrap()
}

#[test]
fn test_login_and_logout() {
    let archive = FakeArchive::new();
    let mut client = client(&archive);

    client.login("jdoe", PASSWORD).unwrap();
    assert!(client.is_logged_in());
    assert_eq!(client.session().unwrap().user, "jdoe");

    client
        .launch_job(&QueryRequest::new("SELECT * FROM public.stars"))
        .unwrap();
    let sent = archive.requests().pop().unwrap();
    assert_eq!(sent.cookie.as_deref(), Some("JSESSIONID=token-jdoe"));

    client.logout().unwrap();
    assert!(!client.is_logged_in());
    client
        .launch_job(&QueryRequest::new("SELECT * FROM public.stars"))
        .unwrap();
    assert_eq!(archive.requests().pop().unwrap().cookie, None);
}

#[test]
fn test_rejected_login() {
    let archive = FakeArchive::new();
    let mut client = client(&archive);
    assert!(matches!(
        client.login("jdoe", "wrong"),
        Err(TapError::AuthenticationFailed(_))
    ));
    assert!(!client.is_logged_in());
}

#[test]
fn test_user_operations_need_a_session() {
    let archive = FakeArchive::new();
    let client = client(&archive);

    assert!(matches!(
        client.upload_table(UploadSource::Table(star_table(2)), "mine", None),
        Err(TapError::AuthenticationRequired { .. })
    ));
    assert!(matches!(
        client.delete_user_table("mine"),
        Err(TapError::AuthenticationRequired { .. })
    ));
    assert!(matches!(
        client.update_table_columns("mine", &[ColumnUpdate::new("ra")]),
        Err(TapError::AuthenticationRequired { .. })
    ));
    assert!(matches!(
        client.share_table("mine", "team", None),
        Err(TapError::AuthenticationRequired { .. })
    ));
    assert!(matches!(
        client.load_groups(),
        Err(TapError::AuthenticationRequired { .. })
    ));
    assert_eq!(archive.total(), 0);
}

#[test]
fn test_plain_tap_service_has_no_user_tables() {
    let mock = MockTransport::new();
    mock.on(
        Method::Post,
        "/login",
        HttpResponse::new(200, "").with_header("Set-Cookie", "JSESSIONID=1"),
    );
    let mut client = TapClient::with_transport(TapConfig::for_archive(Archive::Irsa), mock.clone())
        .unwrap();
    assert!(matches!(
        client.login("jdoe", PASSWORD),
        Err(TapError::Unsupported { .. })
    ));
    assert_eq!(mock.total(), 0);
}

#[test]
fn test_upload_then_query_round_trips() {
    let archive = FakeArchive::new();
    let mut client = client(&archive);
    client.login("jdoe", PASSWORD).unwrap();

    let uploaded = star_table(4);
    let name = client
        .upload_table(UploadSource::Table(uploaded.clone()), "mine", Some("four stars"))
        .unwrap();
    assert_eq!(name.qualified(), "user_jdoe.mine");
    assert!(name.is_private());

    let table = client
        .launch_job(&QueryRequest::new(format!("SELECT * FROM {name}")))
        .unwrap();
    assert_eq!(table.num_rows(), uploaded.num_rows());
    assert_eq!(table.num_columns(), uploaded.num_columns());
    assert_eq!(table.value(3, "source_id"), Some(&Value::Int(4)));
    assert_eq!(
        table.column("phot_g_mean_mag").unwrap().unit.as_deref(),
        Some("mag")
    );
}

#[test]
fn test_upload_from_file() {
    let archive = FakeArchive::new();
    let mut client = client(&archive);
    client.login("jdoe", PASSWORD).unwrap();

    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("stars.vot");
    std::fs::write(&path, star_table(2).to_votable()).unwrap();

    client
        .upload_table(UploadSource::File(path), "from_file", None)
        .unwrap();
    assert_eq!(archive.table("user_jdoe.from_file").unwrap().num_rows(), 2);
    let sent = archive.requests().pop().unwrap();
    assert_eq!(sent.param_value("FORMAT"), Some("votable"));
    assert_eq!(sent.files[0].field, "FILE");
}

#[test]
fn test_table_tool_requests() {
    let mock = MockTransport::new();
    mock.on(
        Method::Post,
        "/login",
        HttpResponse::new(200, "").with_header("Set-Cookie", "JSESSIONID=abc; Path=/"),
    )
    .on(Method::Post, "/TableTool", HttpResponse::new(200, "OK"))
    .on(Method::Post, "/Upload", HttpResponse::new(200, "OK"));
    let mut client =
        TapClient::with_transport(TapConfig::for_archive(Archive::Gaia), mock.clone()).unwrap();
    client.login("jdoe", PASSWORD).unwrap();

    client
        .update_table_columns(
            "mine",
            &[
                ColumnUpdate::new("ra").ucd("pos.eq.ra").flag(ColumnFlag::Ra),
                ColumnUpdate::new("source_id").flag(ColumnFlag::Pk).indexed(true),
            ],
        )
        .unwrap();
    let edit = mock.last_request().unwrap();
    assert_eq!(edit.cookie.as_deref(), Some("JSESSIONID=abc"));
    assert_eq!(edit.param_value("ACTION"), Some("edit"));
    assert_eq!(edit.param_value("TABLE0"), Some("user_jdoe.mine"));
    assert_eq!(edit.param_value("TABLE0_NUMCOLS"), Some("2"));
    assert_eq!(edit.param_value("TABLE0_COL0_UCD"), Some("pos.eq.ra"));
    assert_eq!(edit.param_value("TABLE0_COL0_FLAGS"), Some("Ra"));
    assert_eq!(edit.param_value("TABLE0_COL1"), Some("source_id"));
    assert_eq!(edit.param_value("TABLE0_COL1_INDEXED"), Some("true"));

    client
        .rename_table("mine", Some("renamed"), &[("ra", "ra_deg")])
        .unwrap();
    let rename = mock.last_request().unwrap();
    assert_eq!(rename.param_value("action"), Some("rename"));
    assert_eq!(rename.param_value("new_table_name"), Some("renamed"));
    assert_eq!(rename.param_value("new_column_names"), Some("ra:ra_deg"));

    client.delete_user_table("renamed").unwrap();
    let delete = mock.last_request().unwrap();
    assert_eq!(delete.param_value("TABLE_NAME"), Some("renamed"));
    assert_eq!(delete.param_value("DELETE"), Some("TRUE"));
    assert_eq!(delete.param_value("FORCE_REMOVAL"), Some("TRUE"));

    assert!(matches!(
        client.delete_user_table("gaiadr3.gaia_source"),
        Err(TapError::InvalidInput(_))
    ));
}

#[test]
fn test_sharing_with_a_group() {
    let groups = r#"<groups><group id="12" title="team"><description>d</description></group></groups>"#;
    let mock = MockTransport::new();
    mock.on(
        Method::Post,
        "/login",
        HttpResponse::new(200, "").with_header("Set-Cookie", "JSESSIONID=abc"),
    )
    .on(Method::Get, "/share", HttpResponse::new(200, groups))
    .on(Method::Post, "/share", HttpResponse::new(200, "OK"));
    let mut client =
        TapClient::with_transport(TapConfig::for_archive(Archive::Gaia), mock.clone()).unwrap();
    client.login("jdoe", PASSWORD).unwrap();

    let loaded = client.load_groups().unwrap();
    assert_eq!(loaded[0].id, "12");

    client.share_table("mine", "team", Some("for the team")).unwrap();
    let share = mock.last_request().unwrap();
    assert_eq!(share.param_value("action"), Some("CreateOrUpdateItem"));
    assert_eq!(share.param_value("title"), Some("user_jdoe.mine"));
    assert_eq!(share.param_value("items_list"), Some("12|Group|Read"));

    client.stop_sharing_table("mine", "team").unwrap();
    assert_eq!(
        mock.last_request().unwrap().param_value("action"),
        Some("RemoveItem")
    );

    client.create_group("new team", None).unwrap();
    assert_eq!(
        mock.last_request().unwrap().param_value("action"),
        Some("CreateOrUpdateGroup")
    );

    client.delete_group("team").unwrap();
    let remove = mock.last_request().unwrap();
    assert_eq!(remove.param_value("action"), Some("RemoveGroup"));
    assert_eq!(remove.param_value("group_id"), Some("12"));

    assert!(matches!(
        client.share_table("mine", "nobody", None),
        Err(TapError::InvalidInput(_))
    ));
}

#[test]
fn test_cache_is_bypassed_during_a_session() {
    let archive = FakeArchive::new();
    let dir = tempfile::TempDir::new().unwrap();
    let cache = ResponseCache::with_path(dir.path().to_path_buf());
    let mut client = client(&archive).with_cache(cache.clone());
    let query = QueryRequest::new("SELECT * FROM public.stars");

    client.launch_job(&query).unwrap();
    client.launch_job(&query).unwrap();
    assert_eq!(archive.count(Method::Post, "/tap/sync"), 1);
    assert_eq!(cache.len().unwrap(), 1);

    client.login("jdoe", PASSWORD).unwrap();
    client.launch_job(&query).unwrap();
    client.launch_job(&query).unwrap();
    assert_eq!(archive.count(Method::Post, "/tap/sync"), 3);

    client.logout().unwrap();
    assert_eq!(cache.clear().unwrap(), 1);
    client.launch_job(&query).unwrap();
    assert_eq!(archive.count(Method::Post, "/tap/sync"), 4);
}
