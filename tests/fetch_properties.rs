//! Concurrency, retry and token refresh behavior of the fetch executor

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use patcher::app::{
    aggregate, Endpoint, FailureKind, FetchOutcome, FetchRequest, SummaryPayload,
};
use patcher::errors::{AuthError, FetchError, TransportError};

use common::{executor, fast_retries, CountingTransport};

fn requests(n: usize) -> Vec<FetchRequest> {
    (1..=n)
        .map(|i| FetchRequest::api(format!("/api/v1/items/{}", i)))
        .collect()
}

#[tokio::test]
async fn test_in_flight_never_exceeds_ceiling() {
    let total = 12;
    for concurrency in 1..=total {
        let transport = Arc::new(CountingTransport::new(Duration::from_millis(5)));
        let (_, executor) = executor(
            transport.clone(),
            fast_retries().with_concurrency(concurrency),
        );

        let outcomes = executor.fetch_all(requests(total)).await.unwrap();

        assert_eq!(outcomes.len(), total);
        assert!(outcomes.iter().all(FetchOutcome::is_success));
        assert!(
            transport.max_in_flight() <= concurrency,
            "observed {} in flight with ceiling {}",
            transport.max_in_flight(),
            concurrency
        );
        assert!(executor.stats().peak_in_flight <= concurrency);
    }
}

#[tokio::test]
async fn test_outcomes_keep_request_order() {
    let transport = Arc::new(CountingTransport::new(Duration::from_millis(1)));
    let (_, executor) = executor(transport, fast_retries().with_concurrency(4));

    let outcomes = executor.fetch_all(requests(8)).await.unwrap();
    let paths: Vec<String> = outcomes
        .iter()
        .map(|o| o.request().endpoint.to_string())
        .collect();
    let expected: Vec<String> = (1..=8).map(|i| format!("/api/v1/items/{}", i)).collect();
    assert_eq!(paths, expected);
}

#[tokio::test]
async fn test_single_flight_refresh() {
    let transport = Arc::new(
        CountingTransport::new(Duration::from_millis(1))
            .with_token_latency(Duration::from_millis(20)),
    );
    let (tokens, _) = executor(transport.clone(), fast_retries());

    let callers = (0..16).map(|_| {
        let tokens = tokens.clone();
        async move { tokens.get_valid_token().await }
    });
    let results = join_all(callers).await;

    assert!(results.iter().all(Result::is_ok));
    assert!(results
        .iter()
        .all(|r| r.as_ref().unwrap().value() == "token-1"));
    assert_eq!(transport.exchanges(), 1);
    assert_eq!(tokens.exchange_count(), 1);
}

#[tokio::test]
async fn test_unauthorized_retries_once_with_fresh_token() {
    let transport = Arc::new(CountingTransport::new(Duration::from_millis(1)));
    transport.reject_token("token-1");
    let (tokens, executor) = executor(transport.clone(), fast_retries());

    let outcomes = executor.fetch_all(requests(1)).await.unwrap();

    assert!(outcomes[0].is_success());
    assert_eq!(tokens.exchange_count(), 2);
    assert_eq!(executor.stats().auth_retries, 1);
}

#[tokio::test]
async fn test_second_unauthorized_is_a_per_item_failure() {
    let transport = Arc::new(CountingTransport::new(Duration::from_millis(1)));
    transport.always_unauthorized.store(true, Ordering::SeqCst);
    let (_, executor) = executor(transport.clone(), fast_retries());

    let outcomes = executor.fetch_all(requests(2)).await.unwrap();

    for outcome in &outcomes {
        match outcome {
            FetchOutcome::Failure(failure) => {
                assert_eq!(failure.kind, FailureKind::Unauthorized);
                assert_eq!(failure.attempts, 2);
            }
            FetchOutcome::Success(_) => panic!("expected an unauthorized failure"),
        }
    }
}

#[tokio::test]
async fn test_transient_timeouts_are_retried() {
    let transport = Arc::new(CountingTransport::new(Duration::from_millis(2)));
    transport.time_out("/api/v1/items/3", 2);
    let (_, executor) = executor(transport.clone(), fast_retries().with_concurrency(2));

    let outcomes = executor.fetch_all(requests(5)).await.unwrap();

    assert_eq!(outcomes.len(), 5);
    assert!(outcomes.iter().all(FetchOutcome::is_success));
    assert!(transport.max_in_flight() <= 2);
    let stats = executor.stats();
    assert_eq!(stats.retries, 2);
    assert_eq!(stats.attempts, 7);
}

#[tokio::test]
async fn test_exhausted_retries_become_transient_failure() {
    let transport = Arc::new(CountingTransport::new(Duration::from_millis(1)));
    transport.time_out("/api/v1/items/1", 10);
    let (_, executor) = executor(transport.clone(), fast_retries());

    let outcomes = executor.fetch_all(requests(2)).await.unwrap();

    match &outcomes[0] {
        FetchOutcome::Failure(failure) => {
            assert!(matches!(failure.kind, FailureKind::Transient(_)));
            assert_eq!(failure.attempts, 3);
        }
        FetchOutcome::Success(_) => panic!("expected a transient failure"),
    }
    assert!(outcomes[1].is_success());
}

#[tokio::test]
async fn test_token_expiry_mid_batch_refreshes_once() {
    let transport =
        Arc::new(CountingTransport::new(Duration::from_millis(5)).with_expiry_after(4));
    let (tokens, executor) = executor(transport.clone(), fast_retries().with_concurrency(3));

    let outcomes = executor.fetch_all(requests(10)).await.unwrap();

    assert_eq!(outcomes.len(), 10);
    assert!(outcomes.iter().all(FetchOutcome::is_success));
    assert_eq!(tokens.exchange_count(), 2);
    assert_eq!(transport.exchanges(), 2);
}

#[tokio::test]
async fn test_token_request_timeout_is_retried() {
    let transport = Arc::new(CountingTransport::new(Duration::from_millis(2)));
    transport.time_out("/api/oauth/token", 1);
    let (tokens, executor) = executor(transport.clone(), fast_retries());

    let outcomes = executor.fetch_all(requests(4)).await.unwrap();

    assert!(outcomes.iter().all(FetchOutcome::is_success));
    assert_eq!(transport.token_attempts.load(Ordering::SeqCst), 2);
    assert_eq!(transport.exchanges(), 1);
    assert_eq!(tokens.exchange_count(), 2);
}

#[tokio::test]
async fn test_unreachable_token_endpoint_is_fatal() {
    let transport = Arc::new(CountingTransport::new(Duration::from_millis(1)));
    transport.time_out("/api/oauth/token", 10);
    let (_, executor) = executor(transport.clone(), fast_retries());

    let err = executor.fetch_all(requests(1)).await.unwrap_err();

    assert!(matches!(
        err,
        FetchError::Auth(AuthError::Transport(TransportError::Timeout { .. }))
    ));
    assert_eq!(transport.token_attempts.load(Ordering::SeqCst), 3);
    assert_eq!(transport.gets.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancellation_discards_batch() {
    let transport = Arc::new(CountingTransport::new(Duration::from_millis(50)));
    let (_, executor) = executor(transport, fast_retries().with_concurrency(2));
    let cancel = executor.cancellation_token();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });

    let result = executor.fetch_all(requests(6)).await;
    assert!(matches!(result, Err(FetchError::Cancelled)));
}

#[tokio::test]
async fn test_duplicate_identifiers_keep_first_response() {
    let transport = Arc::new(CountingTransport::new(Duration::from_millis(1)));
    let summary = |title: &str| {
        format!(
            r#"{{"softwareTitleId":"7","title":"{}","latestVersion":"1.0","releaseDate":"2024-01-15T00:00:00Z","upToDate":1,"outOfDate":1}}"#,
            title
        )
    };
    transport.serve("/api/v1/items/1", summary("First"));
    transport.serve("/api/v1/items/2", summary("Second"));
    let (_, executor) = executor(transport, fast_retries().with_concurrency(2));

    let outcomes = executor.fetch_all(requests(2)).await.unwrap();
    let report = aggregate::<SummaryPayload>(&outcomes);

    assert_eq!(report.records.len(), 1);
    assert_eq!(report.records[0].title, "First");
    assert_eq!(report.duplicates, 1);
}

#[tokio::test]
async fn test_paginated_listing_fetches_every_page() {
    let transport = Arc::new(CountingTransport::new(Duration::from_millis(1)));
    transport.serve(
        "/api/v2/mobile-devices",
        r#"{"totalCount":250,"results":[{"id":"1"}]}"#,
    );
    let (_, executor) = executor(transport.clone(), fast_retries());

    let outcomes = executor
        .fetch_paginated(Endpoint::api("/api/v2/mobile-devices"), 100)
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 3);
    assert_eq!(transport.gets.load(Ordering::SeqCst), 3);
    let pages: Vec<u32> = outcomes
        .iter()
        .filter_map(|o| o.request().page.map(|p| p.page))
        .collect();
    assert_eq!(pages, vec![0, 1, 2]);
}
