// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end correlation flow through the runtime: initiate, connect,
//! deliver, disconnect, in every arrival order.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use common::*;
use handoff_core::dispatcher::DeliveryOutcome;
use handoff_core::initiator::TriggerRequest;
use handoff_core::persistence::CorrelationStore;

#[tokio::test]
async fn test_full_handoff_scenario() {
    let ctx = TestContext::new().await;
    ctx.orchestrator.queue_id("abc");

    // 1. Initiate
    let started = ctx
        .runtime
        .start(&TriggerRequest::get("/executions"))
        .await
        .unwrap();
    let response = started.response();
    assert_eq!(response.correlation_id, "abc");
    assert_eq!(response.delivery_address, "wss://host/stage");
    assert_eq!(ctx.bound_connection("abc").await, None);

    // 2. Connect
    ctx.runtime.connect("conn1", "abc").await.unwrap();
    assert_eq!(ctx.bound_connection("abc").await.as_deref(), Some("conn1"));

    // 3. Deliver
    let attempt = ctx.runtime.deliver("abc", b"payload").await.unwrap();
    assert_eq!(attempt.outcome, DeliveryOutcome::Delivered);
    assert_eq!(
        ctx.transport.pushes(),
        vec![("conn1".to_string(), b"payload".to_vec())]
    );

    // 4. Disconnect
    assert_eq!(ctx.runtime.disconnect("conn1").await, 1);
    assert!(ctx.store.get_correlation("abc").await.unwrap().is_none());

    // 5. Deliver again
    let attempt = ctx.runtime.deliver("abc", b"payload2").await.unwrap();
    assert_eq!(attempt.outcome, DeliveryOutcome::ConnectionMissing);
    assert_eq!(ctx.transport.pushes().len(), 1);
}

#[tokio::test]
async fn test_connect_before_start_converges() {
    let ctx = TestContext::new().await;
    ctx.orchestrator.queue_id("early");

    // The client guessed nothing; the connect event simply won the race
    ctx.runtime.connect("conn-early", "early").await.unwrap();
    ctx.runtime
        .start(&TriggerRequest::get("/executions"))
        .await
        .unwrap();

    assert_eq!(
        ctx.bound_connection("early").await.as_deref(),
        Some("conn-early")
    );
}

#[tokio::test]
async fn test_start_before_connect_converges() {
    let ctx = TestContext::new().await;
    ctx.orchestrator.queue_id("late");

    ctx.runtime
        .start(&TriggerRequest::get("/executions"))
        .await
        .unwrap();
    ctx.runtime.connect("conn-late", "late").await.unwrap();

    assert_eq!(
        ctx.bound_connection("late").await.as_deref(),
        Some("conn-late")
    );
}

#[tokio::test]
async fn test_reconnect_overwrites_and_old_connection_is_stale() {
    let ctx = TestContext::new().await;

    ctx.runtime.connect("conn-old", "abc").await.unwrap();
    ctx.runtime.connect("conn-new", "abc").await.unwrap();
    ctx.transport.mark_gone("conn-old");

    let attempt = ctx.runtime.deliver("abc", b"result").await.unwrap();
    assert_eq!(attempt.outcome, DeliveryOutcome::Delivered);
    assert_eq!(attempt.connection_id.as_deref(), Some("conn-new"));

    // The old socket closing must not remove the newer binding
    assert_eq!(ctx.runtime.disconnect("conn-old").await, 0);
    assert_eq!(ctx.bound_connection("abc").await.as_deref(), Some("conn-new"));
}

#[tokio::test]
async fn test_stale_connection_is_not_an_error() {
    let ctx = TestContext::new().await;
    ctx.runtime.connect("conn-gone", "abc").await.unwrap();
    ctx.transport.mark_gone("conn-gone");

    let attempt = ctx.runtime.deliver("abc", b"result").await.unwrap();
    assert_eq!(attempt.outcome, DeliveryOutcome::ConnectionStale);
    assert!(attempt.into_result().is_ok());
}

#[tokio::test]
async fn test_transport_error_is_surfaced_retryable() {
    let ctx = TestContext::new().await;
    ctx.runtime.connect("conn-1", "abc").await.unwrap();
    ctx.transport.mark_broken("conn-1");

    let attempt = ctx.runtime.deliver("abc", b"result").await.unwrap();
    assert!(attempt.is_retryable());

    let err = attempt.into_result().unwrap_err();
    assert_eq!(err.error_code(), "TRANSPORT_ERROR");
    assert_eq!(ctx.transport.pushes().len(), 1);
}

#[tokio::test]
async fn test_sweep_returns_count_of_bound_records() {
    let ctx = TestContext::new().await;
    for i in 0..7 {
        ctx.runtime
            .connect("conn-shared", &format!("exec-{i}"))
            .await
            .unwrap();
    }
    ctx.runtime.connect("conn-other", "exec-x").await.unwrap();

    assert_eq!(ctx.runtime.disconnect("conn-shared").await, 7);
    assert_eq!(ctx.runtime.disconnect("conn-shared").await, 0);
    assert_eq!(ctx.runtime.disconnect("conn-unknown").await, 0);
    assert_eq!(
        ctx.bound_connection("exec-x").await.as_deref(),
        Some("conn-other")
    );
}

#[tokio::test]
async fn test_failed_start_writes_nothing() {
    let ctx = TestContext::new().await;
    ctx.orchestrator.fail.store(true, Ordering::SeqCst);

    let err = ctx
        .runtime
        .start(&TriggerRequest::get("/executions"))
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), "WORKFLOW_START_FAILED");
    assert!(err.is_retryable());
    assert!(ctx.store.get_correlation("exec-1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_unsupported_method_never_reaches_orchestrator() {
    let ctx = TestContext::new().await;

    for method in ["POST", "PUT", "DELETE"] {
        let err = ctx
            .runtime
            .start(&TriggerRequest::new(method, "/executions"))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "UNSUPPORTED_OPERATION");
    }
    assert_eq!(ctx.orchestrator.starts.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_start_and_connect_races() {
    let ctx = Arc::new(TestContext::new().await);
    let count = 25;

    let mut handles = Vec::new();
    for i in 1..=count {
        let ctx_start = ctx.clone();
        handles.push(tokio::spawn(async move {
            ctx_start
                .runtime
                .start(&TriggerRequest::get("/executions"))
                .await
                .map(|_| ())
        }));

        let ctx_connect = ctx.clone();
        handles.push(tokio::spawn(async move {
            ctx_connect
                .runtime
                .connect(&format!("conn-{i}"), &format!("exec-{i}"))
                .await
        }));
    }

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    for i in 1..=count {
        assert_eq!(
            ctx.bound_connection(&format!("exec-{i}")).await,
            Some(format!("conn-{i}")),
            "exec-{i} lost its binding"
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sweeps_of_distinct_connections() {
    let ctx = Arc::new(TestContext::new().await);
    for c in 0..5 {
        for e in 0..4 {
            ctx.runtime
                .connect(&format!("conn-{c}"), &format!("exec-{c}-{e}"))
                .await
                .unwrap();
        }
    }

    let handles: Vec<_> = (0..5)
        .map(|c| {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.runtime.disconnect(&format!("conn-{c}")).await })
        })
        .collect();

    let mut total = 0;
    for handle in handles {
        total += handle.await.unwrap();
    }
    assert_eq!(total, 20);
}
