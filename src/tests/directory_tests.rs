// src/tests/directory_tests.rs

use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;

use crate::breaker::BreakerState;
use crate::directory::{DirectoryError, User, UserDirectory};
use crate::error::GuardError;
use crate::simulation::{FaultProfile, FlakyBackend};
use crate::test_utils::{quick_config, Harness};

fn directory() -> (Harness, Arc<FlakyBackend>, UserDirectory) {
    let harness = Harness::new(quick_config());
    let backend = Arc::new(FlakyBackend::healthy());
    let directory = UserDirectory::new(harness.breaker.clone(), backend.clone());
    (harness, backend, directory)
}

async fn trip(directory: &UserDirectory, backend: &FlakyBackend) {
    backend.set_profile(FaultProfile::outage());
    for _ in 0..4 {
        let _ = directory.find_by_id(1).await;
    }
    assert_eq!(directory.breaker().state(), BreakerState::Open);
}

#[tokio::test]
async fn test_find_by_id() {
    let (_harness, _backend, directory) = directory();

    let user = assert_ok!(directory.find_by_id(2).await).unwrap();
    assert_eq!(user.name, "Maria Sidorova");
    assert_eq!(user.email_domain(), Some("company.ru"));

    assert_eq!(assert_ok!(directory.find_by_id(99).await), None);
}

#[tokio::test]
async fn test_find_by_id_serves_placeholder_on_failure() {
    let (harness, backend, directory) = directory();
    backend.set_profile(FaultProfile::outage());

    let user = assert_ok!(directory.find_by_id(3).await).unwrap();

    assert_eq!(user, User::placeholder(3));
    assert_eq!(harness.breaker.metrics().failed_calls, 1);
}

#[tokio::test]
async fn test_find_all_is_ordered_and_falls_back() {
    let (_harness, backend, directory) = directory();

    let ids: Vec<u64> = assert_ok!(directory.find_all().await)
        .iter()
        .map(|user| user.id)
        .collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);

    backend.set_profile(FaultProfile::outage());
    let users = assert_ok!(directory.find_all().await);
    assert_eq!(users, vec![User::system_fallback()]);
}

#[tokio::test]
async fn test_find_by_email_domain() {
    let (_harness, backend, directory) = directory();

    let names: Vec<String> = assert_ok!(directory.find_by_email_domain("company.ru").await)
        .into_iter()
        .map(|user| user.name)
        .collect();
    assert_eq!(names, vec!["Maria Sidorova", "Alexey Ivanov"]);

    backend.set_profile(FaultProfile::outage());
    assert!(assert_ok!(directory.find_by_email_domain("company.ru").await).is_empty());
}

#[tokio::test]
async fn test_save_assigns_next_id() {
    let (_harness, _backend, directory) = directory();

    let saved = assert_ok!(
        directory
            .save(User::new("Olga Smirnova", "olga@example.com"))
            .await
    );
    assert_eq!(saved.id, 5);

    let loaded = assert_ok!(directory.find_by_id(5).await).unwrap();
    assert_eq!(loaded.email, "olga@example.com");

    // An explicit id replaces the stored user
    let renamed = User {
        id: 5,
        ..User::new("Olga Smirnova-Petrova", "olga@example.com")
    };
    assert_ok!(directory.save(renamed).await);
    assert_eq!(assert_ok!(directory.find_all().await).len(), 5);
}

#[tokio::test]
async fn test_failed_save_is_an_error() {
    let (_harness, backend, directory) = directory();
    backend.set_profile(FaultProfile::outage());

    let err = directory
        .save(User::new("Olga Smirnova", "olga@example.com"))
        .await
        .unwrap_err();

    assert!(err.was_attempted());
    assert!(matches!(err, GuardError::Operation(DirectoryError::Backend(_))));
}

#[tokio::test]
async fn test_save_is_rejected_while_open() {
    let (_harness, backend, directory) = directory();
    trip(&directory, &backend).await;
    backend.set_profile(FaultProfile::healthy());
    let calls = backend.calls();

    let err = directory
        .save(User::new("Olga Smirnova", "olga@example.com"))
        .await
        .unwrap_err();

    assert!(err.is_open());
    assert!(!err.was_attempted());
    assert_eq!(backend.calls(), calls);
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let (harness, _backend, directory) = directory();

    assert!(assert_ok!(directory.delete_by_id(4).await));
    assert!(!assert_ok!(directory.delete_by_id(4).await));
    assert!(!assert_ok!(directory.delete_by_id(42).await));

    let metrics = harness.breaker.metrics();
    assert_eq!(metrics.buffered_calls, 3);
    assert_eq!(metrics.failed_calls, 0);
    assert_eq!(assert_ok!(directory.find_by_id(4).await), None);
}

#[tokio::test]
async fn test_delete_never_succeeds_when_the_database_fails() {
    let (_harness, backend, directory) = directory();
    backend.set_profile(FaultProfile::outage());

    let err = directory.delete_by_id(1).await.unwrap_err();
    assert!(matches!(err, GuardError::Operation(DirectoryError::Backend(_))));

    trip(&directory, &backend).await;
    let err = directory.delete_by_id(1).await.unwrap_err();
    assert!(err.is_open());

    backend.set_profile(FaultProfile::healthy());
    directory.breaker().reset();
    assert_eq!(assert_ok!(directory.find_by_id(1).await).unwrap().id, 1);
}

#[tokio::test]
async fn test_health_check_normalises_to_bool() {
    let (_harness, backend, directory) = directory();
    assert!(directory.is_healthy().await);

    backend.set_profile(FaultProfile::outage());
    assert!(!directory.is_healthy().await);

    trip(&directory, &backend).await;
    backend.set_profile(FaultProfile::healthy());
    // Still open: the check is rejected, not attempted
    assert!(!directory.is_healthy().await);
}

#[tokio::test]
async fn test_stats() {
    let (_harness, backend, directory) = directory();

    let stats = assert_ok!(directory.stats().await);
    assert!(stats.is_available());
    assert_eq!(stats.total_users, Some(4));
    assert_eq!(stats.email_domains, Some(3));

    backend.set_profile(FaultProfile::outage());
    let stats = assert_ok!(directory.stats().await);
    assert!(!stats.is_available());
    assert_eq!(stats.total_users, None);

    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["status"], "unavailable");
    assert!(json.get("total_users").is_none());
}

#[tokio::test]
async fn test_reads_recover_after_wait() {
    let (harness, backend, directory) = directory();
    trip(&directory, &backend).await;
    backend.set_profile(FaultProfile::healthy());

    // Rejected reads are served by the fallback without touching the backend
    let calls = backend.calls();
    assert_eq!(
        assert_ok!(directory.find_by_id(1).await),
        Some(User::placeholder(1))
    );
    assert_eq!(backend.calls(), calls);

    harness.advance(Duration::from_secs(1));
    let user = assert_ok!(directory.find_by_id(1).await).unwrap();
    assert_eq!(user.name, "Ivan Petrov");
    assert_eq!(harness.breaker.state(), BreakerState::Closed);
}
