#![allow(clippy::unwrap_used, clippy::expect_used)]

use adt_core::AdtErr;
use adt_core::ObjectCatalog;
use adt_core::ObjectLifecycle;
use adt_core::SEARCH_PATH;
use core_test_support::PROGRAM_SOURCE_URL;
use core_test_support::PROGRAM_URL;
use core_test_support::lock_response;
use core_test_support::query_value;
use core_test_support::requests_to;
use core_test_support::search_response;
use core_test_support::start_backend;
use core_test_support::test_lifecycle_options;
use core_test_support::test_session;
use pretty_assertions::assert_eq;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::method;
use wiremock::matchers::path;
use wiremock::matchers::query_param;

async fn mount_lock(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(PROGRAM_URL))
        .and(query_param("_action", "LOCK"))
        .respond_with(ResponseTemplate::new(200).set_body_string(lock_response("DEL-1")))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(PROGRAM_URL))
        .and(query_param("_action", "UNLOCK"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

#[tokio::test]
async fn delete_sends_lock_handle_and_skips_unlock() {
    let server = start_backend().await;
    mount_lock(&server).await;
    Mock::given(method("DELETE"))
        .and(path(PROGRAM_URL))
        .and(query_param("lockHandle", "DEL-1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let catalog = ObjectCatalog::builtin();
    let mut session = test_session(&server);
    ObjectLifecycle::new(&mut session, &catalog, test_lifecycle_options())
        .delete_object("PROG/P", "ZTEST", Some("DEVK900002"))
        .await
        .unwrap();

    let deletes = requests_to(&server, "DELETE", PROGRAM_URL).await;
    assert_eq!(query_value(&deletes[0], "corrNr").as_deref(), Some("DEVK900002"));
    let unlocks = requests_to(&server, "POST", PROGRAM_URL)
        .await
        .into_iter()
        .filter(|r| query_value(r, "_action").as_deref() == Some("UNLOCK"))
        .count();
    assert_eq!(unlocks, 0);
}

#[tokio::test]
async fn failed_delete_releases_the_lock() {
    let server = start_backend().await;
    mount_lock(&server).await;
    Mock::given(method("DELETE"))
        .and(path(PROGRAM_URL))
        .respond_with(ResponseTemplate::new(400).set_body_string("still used"))
        .mount(&server)
        .await;

    let catalog = ObjectCatalog::builtin();
    let mut session = test_session(&server);
    let err = ObjectLifecycle::new(&mut session, &catalog, test_lifecycle_options())
        .delete_object("PROG/P", "ZTEST", None)
        .await
        .unwrap_err();

    assert!(matches!(err, AdtErr::Session(_)), "{err:?}");
    let unlocks = requests_to(&server, "POST", PROGRAM_URL)
        .await
        .into_iter()
        .filter(|r| query_value(r, "_action").as_deref() == Some("UNLOCK"))
        .count();
    assert_eq!(unlocks, 1);
}

#[tokio::test]
async fn deleting_a_missing_object_is_not_found() {
    let server = start_backend().await;
    Mock::given(method("POST"))
        .and(path(PROGRAM_URL))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let catalog = ObjectCatalog::builtin();
    let mut session = test_session(&server);
    let err = ObjectLifecycle::new(&mut session, &catalog, test_lifecycle_options())
        .delete_object("PROG/P", "ZTEST", None)
        .await
        .unwrap_err();
    assert!(matches!(err, AdtErr::NotFound { .. }), "{err:?}");
}

#[tokio::test]
async fn read_source_returns_body_and_maps_404() {
    let server = start_backend().await;
    Mock::given(method("GET"))
        .and(path(PROGRAM_SOURCE_URL))
        .respond_with(ResponseTemplate::new(200).set_body_string("REPORT ztest."))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sap/bc/adt/programs/programs/zgone/source/main"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let catalog = ObjectCatalog::builtin();
    let mut session = test_session(&server);
    let mut lifecycle = ObjectLifecycle::new(&mut session, &catalog, test_lifecycle_options());
    assert_eq!(
        lifecycle.read_source("prog/p", "ZTEST").await.unwrap(),
        "REPORT ztest."
    );
    let err = lifecycle.read_source("PROG/P", "ZGONE").await.unwrap_err();
    assert!(
        matches!(err, AdtErr::NotFound { ref name, .. } if name == "ZGONE"),
        "{err:?}"
    );
}

#[tokio::test]
async fn search_filters_by_catalog_search_type() {
    let server = start_backend().await;
    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .and(query_param("query", "ZCL_*"))
        .and(query_param("objectType", "CLAS/OC"))
        .and(query_param("maxResults", "50"))
        .respond_with(ResponseTemplate::new(200).set_body_string(search_response(&[
            ("/sap/bc/adt/oo/classes/zcl_a", "CLAS/OC", "ZCL_A"),
            ("/sap/bc/adt/oo/classes/zcl_b", "CLAS/OC", "ZCL_B"),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let catalog = ObjectCatalog::builtin();
    let mut session = test_session(&server);
    let mut lifecycle = ObjectLifecycle::new(&mut session, &catalog, test_lifecycle_options());
    let hits = lifecycle.search("ZCL_*", Some("CLAS/OC")).await.unwrap();
    let names: Vec<&str> = hits.iter().map(|h| h.name.as_str()).collect();
    assert_eq!(names, vec!["ZCL_A", "ZCL_B"]);
    assert_eq!(hits[0].package.as_deref(), Some("$TMP"));

    assert!(matches!(
        lifecycle.search("X", Some("NOPE")).await,
        Err(AdtErr::UnsupportedObjectType(_))
    ));
}
