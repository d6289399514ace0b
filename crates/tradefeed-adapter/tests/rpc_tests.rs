/*
[INPUT]:  Scripted JSON-RPC acks and notifications
[OUTPUT]: Test results for the JSON-RPC session
[POS]:    Integration tests - RPC subscribe, ack correlation, notification routing
[UPDATE]: When RPC helpers or correlation change
*/

mod common;

use std::sync::Arc;

use common::{MockConnector, Recorder, fast_config, next, noop};
use serde_json::json;
use tradefeed_adapter::protocol::rpc::{ACCOUNT_SUBSCRIBE, DEFAULT_COMMITMENT, DEFAULT_ENCODING, SLOT_SUBSCRIBE};
use tradefeed_adapter::{RpcProtocol, RpcSession};

fn rpc_session(connector: &Arc<MockConnector>) -> Arc<RpcSession> {
    Arc::new(
        RpcSession::new(fast_config("solana", 2), RpcProtocol::new()).with_connector(connector.clone()),
    )
}

// Scenario: account subscribe, ack, notification
#[tokio::test]
async fn test_account_subscribe_ack_and_notification() {
    let connector = MockConnector::new();
    let remote = connector.accept();
    let session = rpc_session(&connector);
    let (recorder, mut received) = Recorder::new();

    assert!(
        session
            .subscribe_account("Acc1", DEFAULT_COMMITMENT, DEFAULT_ENCODING, recorder.callback("account"))
            .await
    );
    assert_eq!(
        remote.sent_json(),
        vec![json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "accountSubscribe",
            "params": ["Acc1", {"commitment": "confirmed", "encoding": "jsonParsed"}]
        })]
    );

    let runner = tokio::spawn({
        let session = session.clone();
        async move { session.start().await }
    });

    remote.push_json(json!({"jsonrpc": "2.0", "result": 42, "id": 1}));
    remote.push_json(json!({
        "jsonrpc": "2.0",
        "method": "accountNotification",
        "params": {"subscription": 42, "result": {"value": {"lamports": 10}}}
    }));

    let (label, payload) = next(&mut received).await;
    assert_eq!(label, "account");
    assert_eq!(payload, json!({"subscription": 42, "result": {"value": {"lamports": 10}}}));
    assert_eq!(session.subscription_id(ACCOUNT_SUBSCRIBE), Some(42));

    assert!(session.unsubscribe(ACCOUNT_SUBSCRIBE).await);
    assert_eq!(
        remote.sent_json().last().unwrap(),
        &json!({"jsonrpc": "2.0", "id": 2, "method": "accountUnsubscribe", "params": [42]})
    );
    assert!(session.subscription_keys().is_empty());

    session.close().await;
    runner.await.unwrap();
    assert!(received.try_recv().is_err());
}

#[tokio::test]
async fn test_raw_subscribe_method_routes_notification_params() {
    let connector = MockConnector::new();
    let remote = connector.accept();
    let session = rpc_session(&connector);
    let (recorder, mut received) = Recorder::new();

    let params = vec![json!("Addr1"), json!({"commitment": "confirmed"})];
    assert!(
        session
            .subscribe_method(ACCOUNT_SUBSCRIBE, recorder.callback("raw"), params)
            .await
    );
    let runner = tokio::spawn({
        let session = session.clone();
        async move { session.start().await }
    });

    remote.push_json(json!({"result": 42, "id": 1}));
    remote.push_json(json!({
        "method": "accountNotification",
        "params": {"subscription": 42, "result": {"lamports": 5}}
    }));

    let (_, payload) = next(&mut received).await;
    assert_eq!(payload, json!({"subscription": 42, "result": {"lamports": 5}}));

    session.close().await;
    runner.await.unwrap();
    assert!(received.try_recv().is_err());
}

#[tokio::test]
async fn test_request_ids_keep_growing_across_reconnects() {
    let connector = MockConnector::new();
    let first = connector.accept();
    let second = connector.accept();
    let session = rpc_session(&connector);

    assert!(session.subscribe_slot(noop()).await);
    assert!(session.subscribe_root(noop()).await);
    assert!(session.reconnect().await);

    let ids: Vec<u64> = first
        .sent_json()
        .iter()
        .chain(second.sent_json().iter())
        .map(|message| message["id"].as_u64().unwrap())
        .collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);
    assert_eq!(second.sent_json()[0]["method"], "slotSubscribe");
}

#[tokio::test]
async fn test_program_subscribe_with_filters() {
    let connector = MockConnector::new();
    let remote = connector.accept();
    let session = rpc_session(&connector);

    let filters = vec![json!({"dataSize": 165})];
    assert!(
        session
            .subscribe_program("Prog1", "finalized", "base64", Some(filters), noop())
            .await
    );
    assert_eq!(
        remote.sent_json()[0]["params"],
        json!(["Prog1", {"commitment": "finalized", "encoding": "base64", "filters": [{"dataSize": 165}]}])
    );
}

#[tokio::test]
async fn test_unsubscribe_without_ack_still_sends() {
    let connector = MockConnector::new();
    let remote = connector.accept();
    let session = rpc_session(&connector);

    assert!(session.subscribe_slot(noop()).await);
    assert!(session.unsubscribe(SLOT_SUBSCRIBE).await);
    assert!(session.subscription_keys().is_empty());
    assert_eq!(
        remote.sent_json().last().unwrap(),
        &json!({"jsonrpc": "2.0", "id": 2, "method": "slotUnsubscribe", "params": [null]})
    );
}

#[tokio::test]
async fn test_repeated_unsubscribe_sends_each_time() {
    let connector = MockConnector::new();
    let remote = connector.accept();
    let session = rpc_session(&connector);
    let (recorder, mut received) = Recorder::new();

    assert!(session.subscribe_slot(recorder.callback("slot")).await);
    let runner = tokio::spawn({
        let session = session.clone();
        async move { session.start().await }
    });

    remote.push_json(json!({"jsonrpc": "2.0", "result": 7, "id": 1}));
    remote.push_json(json!({
        "jsonrpc": "2.0",
        "method": "slotNotification",
        "params": {"subscription": 7, "result": {"slot": 100}}
    }));
    next(&mut received).await;
    assert_eq!(session.subscription_id(SLOT_SUBSCRIBE), Some(7));

    assert!(session.unsubscribe(SLOT_SUBSCRIBE).await);
    assert!(session.unsubscribe(SLOT_SUBSCRIBE).await);
    assert!(session.subscription_keys().is_empty());

    let sent = remote.sent_json();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[1]["params"], json!([7]));
    assert_eq!(sent[2]["method"], "slotUnsubscribe");
    assert_eq!(sent[2]["params"], json!([null]));

    remote.fail_sends();
    assert!(!session.unsubscribe(SLOT_SUBSCRIBE).await);

    session.close().await;
    runner.await.unwrap();
}
