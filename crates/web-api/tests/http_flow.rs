mod support;

use domain::{ConversationId, UserId};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

use support::TestServer;

async fn post_message(
    client: &Client,
    server: &TestServer,
    conversation: ConversationId,
    sender: UserId,
    content: &str,
) -> Value {
    let response = client
        .post(server.http(&format!("/api/v1/conversations/{conversation}/messages")))
        .bearer_auth(server.token(sender))
        .json(&json!({ "content": content }))
        .send()
        .await
        .expect("create");
    assert_eq!(response.status(), StatusCode::CREATED);
    response.json().await.expect("message json")
}

async fn history(
    client: &Client,
    server: &TestServer,
    conversation: ConversationId,
    query: &str,
) -> Vec<String> {
    let messages: Vec<Value> = client
        .get(server.http(&format!(
            "/api/v1/conversations/{conversation}/messages{query}"
        )))
        .bearer_auth(server.token(UserId::generate()))
        .send()
        .await
        .expect("history")
        .json()
        .await
        .expect("history json");
    messages
        .into_iter()
        .map(|m| m["content"].as_str().unwrap_or_default().to_owned())
        .collect()
}

#[tokio::test]
async fn history_pages_newest_first() {
    let server = TestServer::spawn().await;
    let client = Client::new();
    let conversation = ConversationId::generate();
    let sender = UserId::generate();

    for i in 1..=25 {
        post_message(&client, &server, conversation, sender, &format!("t{i}")).await;
    }

    let expected: Vec<String> = (6..=25).rev().map(|i| format!("t{i}")).collect();
    assert_eq!(history(&client, &server, conversation, "").await, expected);

    let expected: Vec<String> = (1..=5).rev().map(|i| format!("t{i}")).collect();
    assert_eq!(
        history(&client, &server, conversation, "?limit=20&skip=20").await,
        expected
    );

    assert!(history(&client, &server, conversation, "?skip=30")
        .await
        .is_empty());
    assert_eq!(
        history(&client, &server, conversation, "?limit=1000")
            .await
            .len(),
        25
    );
}

#[tokio::test]
async fn message_mutations_over_http() {
    let server = TestServer::spawn().await;
    let client = Client::new();
    let conversation = ConversationId::generate();
    let alice = UserId::generate();
    let bob = UserId::generate();

    let message = post_message(&client, &server, conversation, alice, "hello").await;
    let id = message["id"].as_str().expect("id").to_owned();

    for _ in 0..2 {
        let read: Value = client
            .post(server.http(&format!("/api/v1/messages/{id}/read")))
            .bearer_auth(server.token(bob))
            .send()
            .await
            .expect("read")
            .json()
            .await
            .expect("read json");
        assert_eq!(read["readBy"], json!([bob.to_string()]));
    }

    for reaction in ["👍", "❤️"] {
        let response = client
            .put(server.http(&format!("/api/v1/messages/{id}/reaction")))
            .bearer_auth(server.token(bob))
            .json(&json!({ "reaction": reaction }))
            .send()
            .await
            .expect("react");
        assert_eq!(response.status(), StatusCode::OK);
    }
    let reacted: Value = client
        .put(server.http(&format!("/api/v1/messages/{id}/reaction")))
        .bearer_auth(server.token(bob))
        .json(&json!({ "reaction": "❤️" }))
        .send()
        .await
        .expect("react")
        .json()
        .await
        .expect("reaction json");
    let mut expected = serde_json::Map::new();
    expected.insert(bob.to_string(), json!("❤️"));
    assert_eq!(reacted["reactions"], Value::Object(expected));

    let forbidden = client
        .patch(server.http(&format!("/api/v1/messages/{id}")))
        .bearer_auth(server.token(bob))
        .json(&json!({ "content": "hijacked" }))
        .send()
        .await
        .expect("edit by stranger");
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

    let edited: Value = client
        .patch(server.http(&format!("/api/v1/messages/{id}")))
        .bearer_auth(server.token(alice))
        .json(&json!({ "content": "hello, edited" }))
        .send()
        .await
        .expect("edit")
        .json()
        .await
        .expect("edit json");
    assert_eq!(edited["content"], "hello, edited");
    assert!(edited["editedAt"].is_string());

    let deleted: Value = client
        .delete(server.http(&format!("/api/v1/messages/{id}")))
        .bearer_auth(server.token(alice))
        .send()
        .await
        .expect("delete")
        .json()
        .await
        .expect("delete json");
    assert!(deleted["deletedAt"].is_string());

    assert_eq!(history(&client, &server, conversation, "").await.len(), 1);
    assert!(
        history(&client, &server, conversation, "?include_deleted=false")
            .await
            .is_empty()
    );
}

#[tokio::test]
async fn errors_use_stable_codes() {
    let server = TestServer::spawn().await;
    let client = Client::new();
    let conversation = ConversationId::generate();

    let unauthenticated = client
        .get(server.http(&format!("/api/v1/conversations/{conversation}/messages")))
        .send()
        .await
        .expect("request");
    assert_eq!(unauthenticated.status(), StatusCode::UNAUTHORIZED);
    let body: Value = unauthenticated.json().await.expect("error json");
    assert_eq!(body["code"], "UNAUTHORIZED");

    let blank = client
        .post(server.http(&format!("/api/v1/conversations/{conversation}/messages")))
        .bearer_auth(server.token(UserId::generate()))
        .json(&json!({ "content": "  " }))
        .send()
        .await
        .expect("request");
    assert_eq!(blank.status(), StatusCode::BAD_REQUEST);
    let body: Value = blank.json().await.expect("error json");
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let wrong_type = client
        .post(server.http(&format!("/api/v1/conversations/{conversation}/messages")))
        .bearer_auth(server.token(UserId::generate()))
        .json(&json!({ "content": 5 }))
        .send()
        .await
        .expect("request");
    assert_eq!(wrong_type.status(), StatusCode::BAD_REQUEST);
    let body: Value = wrong_type.json().await.expect("error json");
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let bad_limit = client
        .get(server.http(&format!(
            "/api/v1/conversations/{conversation}/messages?limit=abc"
        )))
        .bearer_auth(server.token(UserId::generate()))
        .send()
        .await
        .expect("request");
    assert_eq!(bad_limit.status(), StatusCode::BAD_REQUEST);
    let body: Value = bad_limit.json().await.expect("error json");
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let missing = client
        .post(server.http(&format!(
            "/api/v1/messages/{}/read",
            domain::MessageId::generate()
        )))
        .bearer_auth(server.token(UserId::generate()))
        .send()
        .await
        .expect("request");
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let health = client
        .get(server.http("/health"))
        .send()
        .await
        .expect("health");
    assert_eq!(health.status(), StatusCode::OK);
}
