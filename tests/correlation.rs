//! Concurrent calls resolve by correlation id, whatever order responses
//! arrive in.

mod common;

use common::start_server;
use rpc_core::protocol::handshake::AcceptAll;
use rpc_core::service::{ClientOptions, RpcClient};
use rpc_core::{RpcError, ServiceDispatcher, WireFormat};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

fn scrambling_dispatcher(format: WireFormat) -> ServiceDispatcher {
    let mut dispatcher = ServiceDispatcher::new(format);
    // Later calls finish earlier, so responses come back out of send order.
    dispatcher.register1("double", |n: u64| async move {
        tokio::time::sleep(Duration::from_millis(60u64.saturating_sub(n * 3))).await;
        Ok::<_, String>(n * 2)
    });
    dispatcher
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn out_of_order_responses_reach_their_callers() {
    let format = WireFormat::Bincode;
    let server = start_server(scrambling_dispatcher(format), Arc::new(AcceptAll)).await;
    let client = RpcClient::connect(server.connector(), ClientOptions::default())
        .await
        .unwrap();

    let mut calls = JoinSet::new();
    for n in 0u64..16 {
        let client = client.clone();
        calls.spawn(async move {
            let doubled: u64 = client
                .request("double")
                .arg(&n)
                .unwrap()
                .fetch()
                .await
                .unwrap();
            (n, doubled)
        });
    }

    let mut seen = 0;
    while let Some(result) = calls.join_next().await {
        let (n, doubled) = result.unwrap();
        assert_eq!(doubled, n * 2, "call {n} got someone else's answer");
        seen += 1;
    }
    assert_eq!(seen, 16);
    assert_eq!(client.pending_count(), 0);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timed_out_call_leaves_the_connection_usable() {
    let format = WireFormat::Bincode;
    let mut dispatcher = ServiceDispatcher::new(format);
    dispatcher.register0("slow", || async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok::<_, String>(())
    });
    dispatcher.register0("fast", || async move { Ok::<_, String>(7u32) });

    let server = start_server(dispatcher, Arc::new(AcceptAll)).await;
    let options = ClientOptions {
        call_timeout: Duration::from_millis(100),
        ..ClientOptions::default()
    };
    let client = RpcClient::connect(server.connector(), options).await.unwrap();

    let slow = client.request("slow").send().await;
    assert!(matches!(slow, Err(RpcError::Timeout)));
    assert_eq!(client.pending_count(), 0);

    // Same connection, next call still works.
    let fast: u32 = client.request("fast").fetch().await.unwrap();
    assert_eq!(fast, 7);

    server.stop().await;
}
