#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::Mutex;

use adt_core::ACTIVATION_PATH;
use adt_core::AdtErr;
use adt_core::ObjectCatalog;
use adt_core::ObjectLifecycle;
use adt_core::SEARCH_PATH;
use adt_core::WriteOutcome;
use adt_core::WriteRequest;
use core_test_support::PROGRAM_SOURCE_URL;
use core_test_support::PROGRAM_URL;
use core_test_support::PROGRAMS_COLLECTION;
use core_test_support::ResponseSequence;
use core_test_support::activation_error;
use core_test_support::exception_body;
use core_test_support::lock_response;
use core_test_support::query_value;
use core_test_support::requests_to;
use core_test_support::search_response;
use core_test_support::start_backend;
use core_test_support::structure_response;
use core_test_support::test_lifecycle_options;
use core_test_support::test_session;
use pretty_assertions::assert_eq;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::Request;
use wiremock::Respond;
use wiremock::ResponseTemplate;
use wiremock::matchers::header;
use wiremock::matchers::method;
use wiremock::matchers::path;
use wiremock::matchers::query_param;

const SOURCE: &str = "REPORT ztest.\nWRITE 'hello'.\n";

fn write_request() -> WriteRequest {
    WriteRequest {
        object_type: "PROG/P".to_string(),
        name: "ZTEST".to_string(),
        source: SOURCE.to_string(),
        package: "$TMP".to_string(),
        transport: None,
        description: Some("Test program".to_string()),
    }
}

async fn mount_search(server: &MockServer, body: String) {
    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .and(query_param("operation", "quickSearch"))
        .and(query_param("objectType", "PROG/P"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

/// Structure, lock, write, unlock and activation all succeed.
async fn mount_write_path(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(PROGRAM_URL))
        .respond_with(ResponseTemplate::new(200).set_body_string(structure_response("source/main")))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(PROGRAM_URL))
        .and(query_param("_action", "LOCK"))
        .and(query_param("accessMode", "MODIFY"))
        .respond_with(ResponseTemplate::new(200).set_body_string(lock_response("HANDLE-1")))
        .mount(server)
        .await;
    Mock::given(method("PUT"))
        .and(path(PROGRAM_SOURCE_URL))
        .and(query_param("lockHandle", "HANDLE-1"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(PROGRAM_URL))
        .and(query_param("_action", "UNLOCK"))
        .and(query_param("lockHandle", "HANDLE-1"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(ACTIVATION_PATH))
        .and(query_param("method", "activate"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

async fn run_write(server: &MockServer) -> Result<WriteOutcome, AdtErr> {
    let catalog = ObjectCatalog::builtin();
    let mut session = test_session(server);
    let mut lifecycle = ObjectLifecycle::new(&mut session, &catalog, test_lifecycle_options());
    lifecycle.write_object(&write_request()).await
}

fn unlock_count(requests: &[Request]) -> usize {
    requests
        .iter()
        .filter(|r| query_value(r, "_action").as_deref() == Some("UNLOCK"))
        .count()
}

#[tokio::test]
async fn existing_object_is_written_without_create() {
    let server = start_backend().await;
    mount_search(&server, search_response(&[(PROGRAM_URL, "PROG/P", "ZTEST")])).await;
    mount_write_path(&server).await;
    Mock::given(method("POST"))
        .and(path(PROGRAMS_COLLECTION))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let outcome = run_write(&server).await.unwrap();

    assert_eq!(
        outcome,
        WriteOutcome {
            created: false,
            object_url: PROGRAM_URL.to_string(),
            source_url: PROGRAM_SOURCE_URL.to_string(),
            activated: true,
            activation_error: None,
        }
    );
    let puts = requests_to(&server, "PUT", PROGRAM_SOURCE_URL).await;
    assert_eq!(puts.len(), 1);
    assert_eq!(String::from_utf8_lossy(&puts[0].body), SOURCE);
    assert_eq!(
        unlock_count(&requests_to(&server, "POST", PROGRAM_URL).await),
        1
    );
}

#[tokio::test]
async fn missing_object_is_created_from_the_catalog_envelope() {
    let server = start_backend().await;
    mount_search(&server, search_response(&[])).await;
    mount_write_path(&server).await;
    Mock::given(method("POST"))
        .and(path(PROGRAMS_COLLECTION))
        .and(header(
            "content-type",
            "application/vnd.sap.adt.programs.programs.v2+xml",
        ))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = run_write(&server).await.unwrap();
    assert!(outcome.created);
    assert!(outcome.activated);

    let creates = requests_to(&server, "POST", PROGRAMS_COLLECTION).await;
    let envelope = String::from_utf8_lossy(&creates[0].body).into_owned();
    assert!(envelope.contains(r#"adtcore:name="ZTEST""#), "{envelope}");
    assert!(envelope.contains(r#"adtcore:description="Test program""#), "{envelope}");
    assert!(envelope.contains(r#"adtcore:responsible="DEVELOPER""#), "{envelope}");
    assert!(envelope.contains(r#"<adtcore:packageRef adtcore:name="$TMP"/>"#), "{envelope}");
    assert_eq!(query_value(&creates[0], "corrNr"), None);
}

#[tokio::test]
async fn already_exists_on_create_yields_created_false() {
    let server = start_backend().await;
    // The search index has not caught up with the object yet.
    mount_search(&server, search_response(&[])).await;
    mount_write_path(&server).await;
    Mock::given(method("POST"))
        .and(path(PROGRAMS_COLLECTION))
        .respond_with(ResponseTemplate::new(400).set_body_string(exception_body(
            "ExceptionResourceAlreadyExists",
            "Resource Program ZTEST does already exist.",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = run_write(&server).await.unwrap();
    assert!(!outcome.created);
    assert_eq!(outcome.object_url, PROGRAM_URL);
    assert_eq!(requests_to(&server, "PUT", PROGRAM_SOURCE_URL).await.len(), 1);
}

#[tokio::test]
async fn conflict_status_on_create_means_the_object_exists() {
    let server = start_backend().await;
    mount_search(&server, search_response(&[])).await;
    mount_write_path(&server).await;
    Mock::given(method("POST"))
        .and(path(PROGRAMS_COLLECTION))
        .respond_with(ResponseTemplate::new(409))
        .mount(&server)
        .await;

    let outcome = run_write(&server).await.unwrap();
    assert!(!outcome.created);
}

#[tokio::test]
async fn ambiguous_server_error_is_confirmed_by_a_second_search() {
    let server = start_backend().await;
    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .respond_with(ResponseSequence::new(vec![
            ResponseTemplate::new(200).set_body_string(search_response(&[])),
            ResponseTemplate::new(200)
                .set_body_string(search_response(&[(PROGRAM_URL, "PROG/P", "ZTEST")])),
        ]))
        .expect(2)
        .mount(&server)
        .await;
    mount_write_path(&server).await;
    Mock::given(method("POST"))
        .and(path(PROGRAMS_COLLECTION))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .mount(&server)
        .await;

    let outcome = run_write(&server).await.unwrap();
    assert!(!outcome.created);
    assert!(outcome.activated);
}

#[tokio::test]
async fn create_failure_is_fatal_and_nothing_is_locked() {
    let server = start_backend().await;
    mount_search(&server, search_response(&[])).await;
    mount_write_path(&server).await;
    Mock::given(method("POST"))
        .and(path(PROGRAMS_COLLECTION))
        .respond_with(ResponseTemplate::new(400).set_body_string(exception_body(
            "ExceptionResourceCreationFailure",
            "Package ZMISSING does not exist",
        )))
        .mount(&server)
        .await;

    let err = run_write(&server).await.unwrap_err();
    assert!(matches!(err, AdtErr::Create { ref name, .. } if name == "ZTEST"), "{err:?}");
    assert!(requests_to(&server, "POST", PROGRAM_URL).await.is_empty());
}

#[tokio::test]
async fn search_failure_is_treated_as_not_found() {
    let server = start_backend().await;
    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    mount_write_path(&server).await;
    Mock::given(method("POST"))
        .and(path(PROGRAMS_COLLECTION))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = run_write(&server).await.unwrap();
    assert!(outcome.created);
}

#[tokio::test]
async fn failed_activation_is_reported_in_the_outcome() {
    let server = start_backend().await;
    mount_search(&server, search_response(&[(PROGRAM_URL, "PROG/P", "ZTEST")])).await;
    Mock::given(method("POST"))
        .and(path(ACTIVATION_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(activation_error("Statement \"WRIT\" is not defined.")),
        )
        .with_priority(1)
        .mount(&server)
        .await;
    mount_write_path(&server).await;

    let outcome = run_write(&server).await.unwrap();
    assert!(!outcome.activated);
    let warning = outcome.activation_error.expect("activation warning");
    assert_eq!(warning.message, "Statement \"WRIT\" is not defined.");
    assert_eq!(warning.messages.len(), 1);
    assert_eq!(requests_to(&server, "PUT", PROGRAM_SOURCE_URL).await.len(), 1);
}

#[tokio::test]
async fn activation_http_failure_is_still_a_successful_write() {
    let server = start_backend().await;
    mount_search(&server, search_response(&[(PROGRAM_URL, "PROG/P", "ZTEST")])).await;
    Mock::given(method("POST"))
        .and(path(ACTIVATION_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("dump"))
        .with_priority(1)
        .mount(&server)
        .await;
    mount_write_path(&server).await;

    let outcome = run_write(&server).await.unwrap();
    assert!(!outcome.activated);
    let warning = outcome.activation_error.unwrap();
    assert!(!warning.message.is_empty());
}

#[tokio::test]
async fn activation_can_be_switched_off() {
    let server = start_backend().await;
    mount_search(&server, search_response(&[(PROGRAM_URL, "PROG/P", "ZTEST")])).await;
    mount_write_path(&server).await;

    let catalog = ObjectCatalog::builtin();
    let mut session = test_session(&server);
    let mut options = test_lifecycle_options();
    options.activate = false;
    let outcome = ObjectLifecycle::new(&mut session, &catalog, options)
        .write_object(&write_request())
        .await
        .unwrap();

    assert!(!outcome.activated);
    assert_eq!(outcome.activation_error, None);
    assert!(requests_to(&server, "POST", ACTIVATION_PATH).await.is_empty());
}

#[tokio::test]
async fn structure_not_found_after_create_is_an_error() {
    let server = start_backend().await;
    mount_search(&server, search_response(&[])).await;
    Mock::given(method("POST"))
        .and(path(PROGRAMS_COLLECTION))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(PROGRAM_URL))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = run_write(&server).await.unwrap_err();
    assert!(
        matches!(err, AdtErr::NotFoundAfterCreate { ref object_url } if object_url == PROGRAM_URL),
        "{err:?}"
    );
}

#[tokio::test]
async fn structure_missing_for_found_object_is_reported_without_create() {
    let server = start_backend().await;
    mount_search(&server, search_response(&[(PROGRAM_URL, "PROG/P", "ZTEST")])).await;
    Mock::given(method("GET"))
        .and(path(PROGRAM_URL))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = run_write(&server).await.unwrap_err();
    assert!(
        matches!(err, AdtErr::NotFoundAfterCreate { ref object_url } if object_url == PROGRAM_URL),
        "{err:?}"
    );
    assert!(err.to_string().contains("after being created or found"), "{err}");
    assert!(requests_to(&server, "POST", PROGRAMS_COLLECTION).await.is_empty());
}

#[tokio::test]
async fn structure_source_uri_outside_the_object_is_ignored() {
    let server = start_backend().await;
    mount_search(&server, search_response(&[(PROGRAM_URL, "PROG/P", "ZTEST")])).await;
    Mock::given(method("GET"))
        .and(path(PROGRAM_URL))
        .respond_with(ResponseTemplate::new(200).set_body_string(structure_response(
            "/sap/bc/adt/programs/includes/zother/source/main",
        )))
        .with_priority(1)
        .mount(&server)
        .await;
    mount_write_path(&server).await;

    let outcome = run_write(&server).await.unwrap();
    assert_eq!(outcome.source_url, PROGRAM_SOURCE_URL);
}

#[tokio::test]
async fn lock_without_handle_fails_before_writing() {
    let server = start_backend().await;
    mount_search(&server, search_response(&[(PROGRAM_URL, "PROG/P", "ZTEST")])).await;
    Mock::given(method("POST"))
        .and(path(PROGRAM_URL))
        .and(query_param("_action", "LOCK"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<asx:abap><asx:values><DATA><LOCK_HANDLE></LOCK_HANDLE></DATA></asx:values></asx:abap>",
        ))
        .with_priority(1)
        .mount(&server)
        .await;
    mount_write_path(&server).await;

    let err = run_write(&server).await.unwrap_err();
    assert!(matches!(err, AdtErr::LockAcquisition { .. }), "{err:?}");
    assert!(requests_to(&server, "PUT", PROGRAM_SOURCE_URL).await.is_empty());
    assert_eq!(unlock_count(&requests_to(&server, "POST", PROGRAM_URL).await), 0);
}

#[tokio::test]
async fn failed_write_still_unlocks_and_is_not_retried() {
    let server = start_backend().await;
    mount_search(&server, search_response(&[(PROGRAM_URL, "PROG/P", "ZTEST")])).await;
    Mock::given(method("PUT"))
        .and(path(PROGRAM_SOURCE_URL))
        .respond_with(ResponseTemplate::new(500).set_body_string("short dump"))
        .with_priority(1)
        .mount(&server)
        .await;
    mount_write_path(&server).await;

    let err = run_write(&server).await.unwrap_err();
    assert!(
        matches!(err, AdtErr::Write { ref source_url, .. } if source_url == PROGRAM_SOURCE_URL),
        "{err:?}"
    );
    let object_posts = requests_to(&server, "POST", PROGRAM_URL).await;
    assert_eq!(object_posts.len(), 2, "one lock and one unlock");
    assert_eq!(unlock_count(&object_posts), 1);
    assert!(requests_to(&server, "POST", ACTIVATION_PATH).await.is_empty());
}

#[tokio::test]
async fn unlock_failure_does_not_fail_the_write() {
    let server = start_backend().await;
    mount_search(&server, search_response(&[(PROGRAM_URL, "PROG/P", "ZTEST")])).await;
    Mock::given(method("POST"))
        .and(path(PROGRAM_URL))
        .and(query_param("_action", "UNLOCK"))
        .respond_with(ResponseTemplate::new(500))
        .with_priority(1)
        .mount(&server)
        .await;
    mount_write_path(&server).await;

    let outcome = run_write(&server).await.unwrap();
    assert!(outcome.activated);
}

/// In-memory source store: PUT replaces the text, GET returns it.
#[derive(Clone, Default)]
struct SourceStore {
    text: Arc<Mutex<String>>,
}

impl Respond for SourceStore {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let mut text = self.text.lock().unwrap();
        if request.method.as_str() == "PUT" {
            *text = String::from_utf8_lossy(&request.body).into_owned();
            ResponseTemplate::new(200)
        } else {
            ResponseTemplate::new(200).set_body_string(text.clone())
        }
    }
}

#[tokio::test]
async fn written_source_reads_back_unchanged() {
    let server = start_backend().await;
    mount_search(&server, search_response(&[(PROGRAM_URL, "PROG/P", "ZTEST")])).await;
    Mock::given(path(PROGRAM_SOURCE_URL))
        .respond_with(SourceStore::default())
        .with_priority(1)
        .mount(&server)
        .await;
    mount_write_path(&server).await;

    let catalog = ObjectCatalog::builtin();
    let mut session = test_session(&server);
    let mut lifecycle = ObjectLifecycle::new(&mut session, &catalog, test_lifecycle_options());
    let source = "REPORT ztest.\n* äöü <&>\nWRITE 'round trip'.\n";
    let request = WriteRequest {
        source: source.to_string(),
        ..write_request()
    };
    lifecycle.write_object(&request).await.unwrap();

    assert_eq!(lifecycle.read_source("PROG/P", "ZTEST").await.unwrap(), source);
}

#[tokio::test]
async fn unknown_type_and_bad_names_fail_before_any_request() {
    let server = MockServer::start().await;
    let catalog = ObjectCatalog::builtin();
    let mut session = test_session(&server);
    let mut lifecycle = ObjectLifecycle::new(&mut session, &catalog, test_lifecycle_options());

    let unknown = WriteRequest {
        object_type: "WDYN/Y".to_string(),
        ..write_request()
    };
    assert!(matches!(
        lifecycle.write_object(&unknown).await,
        Err(AdtErr::UnsupportedObjectType(_))
    ));
    let bad_name = WriteRequest {
        name: "Z TEST".to_string(),
        ..write_request()
    };
    assert!(matches!(
        lifecycle.write_object(&bad_name).await,
        Err(AdtErr::InvalidObjectName { .. })
    ));
    assert!(server.received_requests().await.unwrap().is_empty());
}
