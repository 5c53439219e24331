//! API Integration Tests

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::util::ServiceExt;

use sepa_ledger::api::{build_router, AppState};
use sepa_ledger::domain::{Currency, SepaAccountType};
use sepa_ledger::handlers::BankingEventHandler;

mod common;

use common::{TestStack, DE_IBAN};

fn app(stack: &TestStack) -> Router {
    let state = AppState {
        orchestrator: stack.orchestrator.clone(),
        provisioner: stack.provisioner.clone(),
        accounts: stack.accounts.clone(),
        banking: Arc::new(BankingEventHandler::new(stack.directory.clone(), 100_000_000)),
    };
    build_router(state, false)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn transfer_body(account_id: u128, amount: u64, currency: &str) -> Value {
    json!({
        "accountId": account_id.to_string(),
        "amount": amount,
        "currency": currency,
        "bankInfo": {
            "iban": DE_IBAN,
            "bic": "COBADEFFXXX",
            "recipientName": "Erika Mustermann"
        },
        "urgency": "standard"
    })
}

#[tokio::test]
async fn test_health_check() {
    let stack = TestStack::new().await;
    let app = app(&stack);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"OK");
}

#[tokio::test]
async fn test_correlation_id_is_echoed() {
    let stack = TestStack::new().await;
    let app = app(&stack);

    let req = Request::builder()
        .uri("/api/v1/sepa/flows")
        .header("x-correlation-id", "req-7781")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.headers()["x-correlation-id"], "req-7781");

    let req = Request::builder()
        .uri("/api/v1/sepa/flows")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert!(response.headers().contains_key("x-correlation-id"));
}

#[tokio::test]
async fn test_account_open_and_balance() {
    let stack = TestStack::new().await;
    let app = app(&stack);

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/accounts",
        Some(json!({ "customerRef": "42", "currency": "nok" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["customerRef"], "42");
    assert_eq!(body["currency"], "NOK");
    let account_id = body["accountId"].as_str().unwrap().to_string();

    let (status, body) = send(&app, "GET", &format!("/api/v1/accounts/{}/balance", account_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accountId"], account_id);
    assert_eq!(body["balance"], "0");
    assert_eq!(body["creditsPosted"], "0");

    let (status, body) = send(&app, "GET", "/api/v1/accounts/not-a-number/balance", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "invalid_request");

    let (status, body) = send(&app, "GET", "/api/v1/accounts/123/balance", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_code"], "account_not_found");

    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/accounts",
        Some(json!({ "customerRef": "42", "currency": "XYZ" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_sepa_account_lifecycle() {
    let stack = TestStack::new().await;
    let app = app(&stack);

    let (status, body) = send(&app, "GET", "/api/v1/sepa/accounts/validate", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["valid"], false);

    let (status, body) = send(&app, "POST", "/api/v1/sepa/accounts/initialize", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["successCount"], 12);
    assert_eq!(body["created"].as_array().unwrap().len(), 12);

    let (status, body) = send(&app, "POST", "/api/v1/sepa/accounts/initialize", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["existing"].as_array().unwrap().len(), 12);

    let (status, body) = send(&app, "GET", "/api/v1/sepa/accounts/validate", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
}

#[tokio::test]
async fn test_outgoing_transfer_e2e() {
    let stack = TestStack::provisioned().await;
    let app = app(&stack);
    let customer = stack.funded_customer(Currency::Eur, 100_000).await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/sepa/transfers/outgoing",
        Some(transfer_body(customer, 25_000, "EUR")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "unexpected body: {}", body);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["stage"], "settlement");
    assert_eq!(body["direction"], "outgoing");
    let transfer_ids = body["transferIds"].as_array().unwrap();
    assert_eq!(transfer_ids.len(), 2);
    assert!(transfer_ids[0].as_str().unwrap().parse::<u128>().is_ok());

    let (status, body) = send(&app, "GET", "/api/v1/sepa/suspense/eur", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["settlement"]["balance"], "25000");
    assert_eq!(body["settlement"]["credits"], "25000");
    assert_eq!(body["outgoingSuspense"]["balance"], "0");
    assert_eq!(body["outgoingSuspense"]["debits"], "25000");

    let (_, body) = send(&app, "GET", &format!("/api/v1/accounts/{}/balance", customer), None).await;
    assert_eq!(body["balance"], "75000");
}

#[tokio::test]
async fn test_transfer_errors() {
    let stack = TestStack::provisioned().await;
    let app = app(&stack);
    let customer = stack.funded_customer(Currency::Eur, 1_000).await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/sepa/transfers/outgoing",
        Some(transfer_body(customer, 500, "USD")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "currency_not_supported");

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/sepa/transfers/outgoing",
        Some(transfer_body(customer, 5_000, "EUR")),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error_code"], "insufficient_funds");

    let (status, body) = send(&app, "GET", "/api/v1/sepa/suspense/USD", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "currency_not_supported");
}

#[tokio::test]
async fn test_system_account_rejected_as_customer() {
    let stack = TestStack::provisioned().await;
    let app = app(&stack);
    let settlement = stack.sepa_account(SepaAccountType::Settlement, Currency::Eur).await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/sepa/transfers/outgoing",
        Some(transfer_body(settlement, 500, "EUR")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "invalid_request");
}

#[tokio::test]
async fn test_stranded_incoming_transfer() {
    let stack = TestStack::provisioned().await;
    let app = app(&stack);

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/sepa/transfers/incoming",
        Some(transfer_body(999_999, 25_000, "EUR")),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error_code"], "stranded_in_suspense");
    assert!(body["details"].as_str().unwrap().starts_with("SEPA_IN_EUR_"));

    let suspense = stack
        .sepa_account(SepaAccountType::IncomingSuspense, Currency::Eur)
        .await;
    assert_eq!(stack.balance(suspense).await, 25_000);
}

#[tokio::test]
async fn test_flows_endpoint() {
    let stack = TestStack::new().await;
    let app = app(&stack);

    let (status, body) = send(&app, "GET", "/api/v1/sepa/flows", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["eventsApplied"], 0);
    assert_eq!(body["duplicatesIgnored"], 0);
}
