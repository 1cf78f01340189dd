//! Service-level flows that need more than one task.

use authd::config::{CredentialScheme, SecurityConfig};
use authd::db::Store;
use authd::services::{AccountError, AccountService, SeaOrmAccountService};
use std::sync::Arc;

fn security(scheme: CredentialScheme) -> SecurityConfig {
    SecurityConfig {
        secret_key: "race-test-secret".to_string(),
        credential_scheme: scheme,
        argon2_memory_cost_kib: 1024,
        argon2_time_cost: 1,
        ..SecurityConfig::default()
    }
}

async fn service(scheme: CredentialScheme) -> (Store, Arc<SeaOrmAccountService>) {
    let store = Store::with_pool_options("sqlite::memory:", 1, 1)
        .await
        .expect("in-memory store");
    let service = SeaOrmAccountService::new(&store, &security(scheme)).expect("service");
    (store, Arc::new(service))
}

async fn race(service: Arc<SeaOrmAccountService>, attempts: usize) -> Vec<Result<(), AccountError>> {
    let handles: Vec<_> = (0..attempts)
        .map(|i| {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                let password = format!("password-{i}");
                service
                    .register("contended", Some(&password))
                    .await
                    .map(|_| ())
            })
        })
        .collect();

    let mut results = Vec::with_capacity(attempts);
    for handle in handles {
        results.push(handle.await.expect("registration task panicked"));
    }
    results
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_registrations_admit_exactly_one() {
    let (store, service) = service(CredentialScheme::Password).await;

    let results = race(Arc::clone(&service), 8).await;

    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, AccountError::DuplicateUsername))
    );

    let rows = store
        .users()
        .list(
            &[],
            &authd::db::Fields::new()
                .with(authd::entities::users::Column::Username, "contended"),
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_token_registrations_admit_exactly_one() {
    let (_, service) = service(CredentialScheme::Token).await;

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.register("contended", None).await })
        })
        .collect();

    let mut tokens = Vec::new();
    let mut duplicates = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(registration) => tokens.push(registration.token.unwrap()),
            Err(AccountError::DuplicateUsername) => duplicates += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(tokens.len(), 1);
    assert_eq!(duplicates, 5);

    let account = service.resolve_from_token(&tokens[0]).await.unwrap();
    assert_eq!(account.username, "contended");
}

#[tokio::test]
async fn test_removed_ids_are_not_reused() {
    let (_, service) = service(CredentialScheme::Password).await;

    let first = service.register("first", Some("pw")).await.unwrap();
    service.remove(first.account.id).await.unwrap();

    let second = service.register("second", Some("pw")).await.unwrap();
    assert!(second.account.id > first.account.id);

    // Freed username can be registered again.
    let again = service.register("first", Some("pw")).await.unwrap();
    assert!(again.account.id > second.account.id);
}
