#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use adt_backend_client::CancellationToken;
use adt_backend_client::StatusCode;
use adt_core::ACTIVATION_PATH;
use adt_core::AdtErr;
use adt_core::LifecycleOptions;
use adt_core::ObjectCatalog;
use adt_core::ObjectLifecycle;
use adt_core::SEARCH_PATH;
use adt_core::WriteRequest;
use core_test_support::PROGRAM_SOURCE_URL;
use core_test_support::PROGRAM_URL;
use core_test_support::ResponseSequence;
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
use wiremock::Request;
use wiremock::Respond;
use wiremock::ResponseTemplate;
use wiremock::matchers::method;
use wiremock::matchers::path;
use wiremock::matchers::query_param;

fn write_request() -> WriteRequest {
    WriteRequest {
        object_type: "PROG/P".to_string(),
        name: "ZTEST".to_string(),
        source: "REPORT ztest.".to_string(),
        package: "$TMP".to_string(),
        transport: Some("DEVK900001".to_string()),
        description: None,
    }
}

fn locked() -> ResponseTemplate {
    ResponseTemplate::new(423).set_body_string("Object ZTEST is locked by user OTHER")
}

/// Everything except the PUT of the source, and optionally the lock.
async fn mount_object(server: &MockServer, mount_lock: bool) {
    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(search_response(&[(PROGRAM_URL, "PROG/P", "ZTEST")])),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(PROGRAM_URL))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
    if mount_lock {
        Mock::given(method("POST"))
            .and(path(PROGRAM_URL))
            .and(query_param("_action", "LOCK"))
            .respond_with(ResponseTemplate::new(200).set_body_string(lock_response("H1")))
            .mount(server)
            .await;
    }
    Mock::given(method("POST"))
        .and(path(PROGRAM_URL))
        .and(query_param("_action", "UNLOCK"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(ACTIVATION_PATH))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

fn count_action(requests: &[Request], action: &str) -> usize {
    requests
        .iter()
        .filter(|r| query_value(r, "_action").as_deref() == Some(action))
        .count()
}

#[tokio::test]
async fn locked_write_is_retried_and_unlocked_after_every_attempt() {
    let server = start_backend().await;
    mount_object(&server, true).await;
    Mock::given(method("PUT"))
        .and(path(PROGRAM_SOURCE_URL))
        .respond_with(ResponseSequence::new(vec![
            locked(),
            locked(),
            ResponseTemplate::new(200),
        ]))
        .expect(3)
        .mount(&server)
        .await;

    let catalog = ObjectCatalog::builtin();
    let mut session = test_session(&server);
    let outcome = ObjectLifecycle::new(&mut session, &catalog, test_lifecycle_options())
        .write_object(&write_request())
        .await
        .unwrap();
    assert!(outcome.activated);

    let object_posts = requests_to(&server, "POST", PROGRAM_URL).await;
    assert_eq!(count_action(&object_posts, "LOCK"), 3);
    assert_eq!(count_action(&object_posts, "UNLOCK"), 3);
    for put in requests_to(&server, "PUT", PROGRAM_SOURCE_URL).await {
        assert_eq!(query_value(&put, "lockHandle").as_deref(), Some("H1"));
        assert_eq!(query_value(&put, "corrNr").as_deref(), Some("DEVK900001"));
    }
}

#[tokio::test]
async fn persistent_lock_gives_up_after_three_attempts() {
    let server = start_backend().await;
    mount_object(&server, true).await;
    Mock::given(method("PUT"))
        .and(path(PROGRAM_SOURCE_URL))
        .respond_with(locked())
        .expect(3)
        .mount(&server)
        .await;

    let catalog = ObjectCatalog::builtin();
    let mut session = test_session(&server);
    let err = ObjectLifecycle::new(&mut session, &catalog, test_lifecycle_options())
        .write_object(&write_request())
        .await
        .unwrap_err();

    assert!(err.is_locked(), "{err:?}");
    assert_eq!(err.status(), Some(StatusCode::LOCKED));
    let object_posts = requests_to(&server, "POST", PROGRAM_URL).await;
    assert_eq!(count_action(&object_posts, "LOCK"), 3);
    assert_eq!(count_action(&object_posts, "UNLOCK"), 3);
    assert!(requests_to(&server, "POST", ACTIVATION_PATH).await.is_empty());
}

#[tokio::test]
async fn locked_lock_request_is_retried_without_unlock() {
    let server = start_backend().await;
    mount_object(&server, false).await;
    Mock::given(method("POST"))
        .and(path(PROGRAM_URL))
        .and(query_param("_action", "LOCK"))
        .respond_with(ResponseSequence::new(vec![
            locked(),
            ResponseTemplate::new(200).set_body_string(lock_response("H2")),
        ]))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(PROGRAM_SOURCE_URL))
        .and(query_param("lockHandle", "H2"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let catalog = ObjectCatalog::builtin();
    let mut session = test_session(&server);
    ObjectLifecycle::new(&mut session, &catalog, test_lifecycle_options())
        .write_object(&write_request())
        .await
        .unwrap();

    let object_posts = requests_to(&server, "POST", PROGRAM_URL).await;
    assert_eq!(count_action(&object_posts, "UNLOCK"), 1);
}

/// Fires the session's cancellation token while answering the PUT.
struct CancelOnWrite {
    cancel: CancellationToken,
}

impl Respond for CancelOnWrite {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.cancel.cancel();
        locked()
    }
}

#[tokio::test]
async fn cancellation_during_write_still_releases_the_lock() {
    let server = start_backend().await;
    mount_object(&server, true).await;
    let cancel = CancellationToken::new();
    Mock::given(method("PUT"))
        .and(path(PROGRAM_SOURCE_URL))
        .respond_with(CancelOnWrite {
            cancel: cancel.clone(),
        })
        .mount(&server)
        .await;

    let catalog = ObjectCatalog::builtin();
    let mut session = test_session(&server).with_cancellation(cancel);
    let err = ObjectLifecycle::new(&mut session, &catalog, test_lifecycle_options())
        .write_object(&write_request())
        .await
        .unwrap_err();

    assert!(err.is_cancelled(), "{err:?}");
    let object_posts = requests_to(&server, "POST", PROGRAM_URL).await;
    assert_eq!(count_action(&object_posts, "LOCK"), 1);
    assert_eq!(count_action(&object_posts, "UNLOCK"), 1);
    assert!(!matches!(err, AdtErr::LockAcquisition { .. }));
}

/// Fires the cancellation token on the first unlock and rejects it with a
/// stale-token 403; later unlocks succeed.
struct CancelThenForbidUnlock {
    cancel: CancellationToken,
    calls: AtomicUsize,
}

impl Respond for CancelThenForbidUnlock {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.cancel.cancel();
            ResponseTemplate::new(403).set_body_string("CSRF token validation failed")
        } else {
            ResponseTemplate::new(200)
        }
    }
}

#[tokio::test]
async fn unlock_with_stale_token_is_replayed_after_cancellation() {
    let server = start_backend().await;
    let cancel = CancellationToken::new();
    Mock::given(method("POST"))
        .and(path(PROGRAM_URL))
        .and(query_param("_action", "UNLOCK"))
        .respond_with(CancelThenForbidUnlock {
            cancel: cancel.clone(),
            calls: AtomicUsize::new(0),
        })
        .with_priority(1)
        .expect(2)
        .mount(&server)
        .await;
    mount_object(&server, true).await;
    Mock::given(method("PUT"))
        .and(path(PROGRAM_SOURCE_URL))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let catalog = ObjectCatalog::builtin();
    let mut session = test_session(&server).with_cancellation(cancel);
    let options = LifecycleOptions {
        activate: false,
        ..test_lifecycle_options()
    };
    let outcome = ObjectLifecycle::new(&mut session, &catalog, options)
        .write_object(&write_request())
        .await
        .unwrap();

    assert!(!outcome.activated);
    let object_posts = requests_to(&server, "POST", PROGRAM_URL).await;
    assert_eq!(count_action(&object_posts, "LOCK"), 1);
    assert_eq!(count_action(&object_posts, "UNLOCK"), 2);
}
