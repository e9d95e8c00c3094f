//! End-to-end robot delivery against a local HTTP mock.

use std::time::Duration;

use httpmock::prelude::*;
use serde_json::json;
use serial_test::serial;

use webhook_notifier::{DeliveryError, Message, NotifierClient, SendContext, USER_AGENT};

fn client_for(server: &MockServer, retries: u32) -> NotifierClient {
    NotifierClient::builder()
        .access_token("tok")
        .base_url(server.base_url())
        .retry_count(retries)
        .retry_interval(Duration::from_millis(10))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_text_message_is_posted_as_json() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/robot/send")
                .query_param("access_token", "tok")
                .header("content-type", "application/json; charset=utf-8")
                .header("user-agent", USER_AGENT)
                .json_body(json!({
                    "msgtype": "text",
                    "text": {"content": "deploy finished"},
                    "at": {"atMobiles": ["13800138000"], "isAtAll": true}
                }));
            then.status(200)
                .json_body(json!({"errcode": 0, "errmsg": "ok"}));
        })
        .await;

    let client = client_for(&server, 3);
    client
        .send(
            Message::text("deploy finished")
                .at_mobiles(["13800138000"])
                .at_all(),
            &SendContext::new(),
        )
        .await
        .unwrap();

    mock.assert_hits_async(1).await;
}

#[tokio::test]
async fn test_signed_request_has_signature_params() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/robot/send")
                .query_param("access_token", "tok")
                .query_param_exists("timestamp")
                .query_param_exists("sign");
            then.status(200)
                .json_body(json!({"errcode": 0, "errmsg": "ok"}));
        })
        .await;

    let client = NotifierClient::builder()
        .access_token("tok")
        .sign_secret("SEC123")
        .base_url(server.base_url())
        .build()
        .unwrap();

    client
        .send(Message::markdown("alert", "## CPU"), &SendContext::new())
        .await
        .unwrap();

    mock.assert_hits_async(1).await;
}

#[tokio::test]
async fn test_api_error_hits_server_once() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/robot/send");
            then.status(200)
                .json_body(json!({"errcode": 300001, "errmsg": "token is not exist"}));
        })
        .await;

    let client = client_for(&server, 3);
    let err = client
        .send(Message::text("x"), &SendContext::new())
        .await
        .unwrap_err();

    mock.assert_hits_async(1).await;
    assert_eq!(err.api_error(), Some((300001, "token is not exist")));
}

#[tokio::test]
async fn test_server_errors_are_retried_until_exhausted() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/robot/send");
            then.status(500).body("boom");
        })
        .await;

    let client = client_for(&server, 2);
    let err = client
        .send(Message::feed_card().add_link("a", "https://a", "https://a.png"), &SendContext::new())
        .await
        .unwrap_err();

    mock.assert_hits_async(3).await;
    assert!(matches!(
        err,
        DeliveryError::RetriesExhausted { retries: 2, .. }
    ));
}

#[tokio::test]
async fn test_expired_deadline_never_delivers() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/robot/send");
            then.status(200)
                .json_body(json!({"errcode": 0, "errmsg": "ok"}));
        })
        .await;

    let client = client_for(&server, 3);
    let ctx = SendContext::new().with_timeout(Duration::ZERO);
    let err = client.send(Message::text("late"), &ctx).await.unwrap_err();

    assert!(matches!(err, DeliveryError::DeadlineExceeded));
    mock.assert_hits_async(0).await;
}

#[tokio::test]
async fn test_slow_server_is_cut_off_by_deadline() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/robot/send");
            then.status(200)
                .delay(Duration::from_secs(5))
                .json_body(json!({"errcode": 0, "errmsg": "ok"}));
        })
        .await;

    let client = client_for(&server, 3);
    let ctx = SendContext::new().with_timeout(Duration::from_millis(200));
    let err = client.send(Message::text("slow"), &ctx).await.unwrap_err();

    assert!(matches!(err, DeliveryError::DeadlineExceeded));
}

#[test]
#[serial]
fn test_from_env_reads_level_variables() {
    std::env::set_var("DINGTALK_ACCESS_TOKEN_P1", "env-token");
    std::env::set_var("DINGTALK_SECRET_P1", "env-secret");

    let client = NotifierClient::from_env("p1").unwrap();
    assert!(client.is_signed());

    std::env::remove_var("DINGTALK_SECRET_P1");
    let err = NotifierClient::from_env("p1").unwrap_err();
    assert!(matches!(err, DeliveryError::MissingEnv(_)));

    std::env::remove_var("DINGTALK_ACCESS_TOKEN_P1");
}
