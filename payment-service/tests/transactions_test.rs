mod common;

use common::{payment_intent, succeeded_event, TestApp};
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn list_paginates_newest_first() {
    let app = TestApp::spawn().await;
    for i in 0..55 {
        app.post_webhook(&succeeded_event(&format!("pi_{i:02}"), "buyer@example.com"))
            .await;
    }

    let body: serde_json::Value = app
        .get("/transactions?limit=50&page=1")
        .await
        .json()
        .await
        .unwrap();

    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 50);
    assert_eq!(data[0]["payment_reference"], "pi_54");
    assert_eq!(
        body["pagination"],
        json!({"page": 1, "limit": 50, "total": 55, "totalPages": 2})
    );

    let second: serde_json::Value = app
        .get("/transactions?limit=50&page=2")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(second["data"].as_array().unwrap().len(), 5);
    assert_eq!(second["pagination"]["total"], 55);
}

#[tokio::test]
async fn list_filters_by_email_and_status() {
    let app = TestApp::spawn().await;
    app.post_webhook(&succeeded_event("pi_a", "a@example.com")).await;
    app.post_webhook(&succeeded_event("pi_b", "b@example.com")).await;

    let body: serde_json::Value = app
        .get("/transactions?customer_email=b@example.com&status=succeeded")
        .await
        .json()
        .await
        .unwrap();

    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["payment_reference"], "pi_b");
    assert_eq!(body["pagination"]["total"], 1);

    let none: serde_json::Value = app
        .get("/transactions?status=failed")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(none["pagination"]["total"], 0);
}

#[tokio::test]
async fn malformed_list_queries_use_the_error_envelope() {
    let app = TestApp::spawn().await;

    for query in ["/transactions?status=bogus", "/transactions?page=abc"] {
        let response = app.get(query).await;
        assert_eq!(response.status().as_u16(), 400, "{query}");
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["success"], false, "{query}");
        assert!(body["error"]["message"].is_string(), "{query}");
    }
}

#[tokio::test]
async fn get_transaction_returns_404_when_absent() {
    let app = TestApp::spawn().await;
    app.post_webhook(&succeeded_event("pi_1", "buyer@example.com")).await;

    let found = app.get("/transactions/pi_1").await;
    assert_eq!(found.status().as_u16(), 200);
    let body: serde_json::Value = found.json().await.unwrap();
    assert_eq!(body["data"]["status"], "succeeded");
    assert_eq!(body["data"]["settlement_amount"], "25");

    let missing = app.get("/transactions/pi_missing").await;
    assert_eq!(missing.status().as_u16(), 404);
}

#[tokio::test]
async fn stripe_listing_filters_client_side() {
    let app = TestApp::spawn().await;

    let mut mine = payment_intent("pi_1", "succeeded", 1000, json!({}));
    mine["receipt_email"] = json!("Buyer@Example.com");

    Mock::given(method("GET"))
        .and(path("/v1/payment_intents"))
        .and(query_param("limit", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [
                mine,
                payment_intent("pi_2", "succeeded", 1000, json!({"customer_email": "other@example.com"})),
                payment_intent("pi_3", "canceled", 1000, json!({"customer_email": "buyer@example.com"})),
            ],
            "has_more": false
        })))
        .mount(&app.stripe)
        .await;

    let body: serde_json::Value = app
        .get("/transactions/stripe?limit=10&status=succeeded&customer_email=buyer@example.com")
        .await
        .json()
        .await
        .unwrap();

    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["id"], "pi_1");
    assert_eq!(body["has_more"], false);
    assert!(app.store.is_empty().await);
}

#[tokio::test]
async fn sync_twice_never_duplicates() {
    let app = TestApp::spawn().await;

    Mock::given(method("GET"))
        .and(path("/v1/payment_intents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [
                payment_intent("pi_1", "succeeded", 1000, json!({"usdc_amount": "10"})),
                payment_intent("pi_2", "processing", 2000, json!({})),
                payment_intent("pi_3", "requires_payment_method", 3000, json!({})),
            ],
            "has_more": false
        })))
        .mount(&app.stripe)
        .await;

    let first: serde_json::Value = app
        .post_json("/transactions/sync", &json!({}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(first["data"]["total"], 3);
    assert_eq!(first["data"]["synced"], 3);

    let second: serde_json::Value = app
        .post_json("/transactions/sync", &json!({}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(second["data"]["synced"], 0);
    assert_eq!(second["data"]["updated"], 0);
    assert_eq!(second["data"]["skipped"], 3);
    assert_eq!(second["data"]["errors"], json!([]));
    assert_eq!(app.store.len().await, 3);
}

#[tokio::test]
async fn sync_surfaces_stripe_rejections() {
    let app = TestApp::spawn().await;

    Mock::given(method("GET"))
        .and(path("/v1/payment_intents"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "Invalid API Key provided", "type": "invalid_request_error"}
        })))
        .mount(&app.stripe)
        .await;

    let response = app.post_json("/transactions/sync", &json!({})).await;

    assert_eq!(response.status().as_u16(), 400);
    assert!(app.store.is_empty().await);
}
