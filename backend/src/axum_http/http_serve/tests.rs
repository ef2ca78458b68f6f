use super::*;
use crate::{
    auth::IdentityClaims,
    config::config_model::{
        BackendServer, Checkout, Database, IdentityProvider, Redirects, Stripe,
    },
    usecases::stripe_gateway::MockStripeGateway,
};
use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use billing::{
    domain::entities::{entitlements::EntitlementEntity, plans::PlanEntity},
    domain::value_objects::enums::plan_types::PlanType,
    infra::memory::InMemoryBillingStore,
};
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

const SECRET: &str = "supersecretjwtsecretforunittesting123";

fn config() -> DotEnvyConfig {
    DotEnvyConfig {
        backend_server: BackendServer {
            port: 0,
            body_limit: 1,
            timeout: 5,
        },
        database: Database {
            url: "postgres://unused".to_string(),
        },
        stripe: Stripe {
            secret_key: "sk_test".to_string(),
            webhook_secret: "whsec_test".to_string(),
            api_base: "https://api.stripe.com".to_string(),
            webhook_tolerance_secs: 300,
        },
        checkout: Checkout {
            success_url: "https://app.example/billing/success".to_string(),
            cancel_url: "https://app.example/billing/cancel".to_string(),
            payment_method_return_url: "https://app.example/billing".to_string(),
        },
        identity_provider: IdentityProvider {
            jwt_secret: SECRET.to_string(),
            jwt_audience: "authenticated".to_string(),
        },
        redirects: Redirects {
            plan_selection_url: "https://app.example/plans".to_string(),
            dashboard_url: "https://app.example/dashboard".to_string(),
        },
    }
}

fn monthly_plan() -> PlanEntity {
    PlanEntity {
        id: Uuid::new_v4(),
        name: "Monthly".to_string(),
        external_price_id: "price_monthly".to_string(),
        plan_type: PlanType::Monthly,
        monthly_credit_allotment: 50,
        price_minor: 1_000,
        currency: "usd".to_string(),
        is_active: true,
    }
}

fn active_record(account_id: Uuid, plan_id: Uuid, credits: i32) -> EntitlementEntity {
    let now = Utc::now();
    EntitlementEntity {
        id: Uuid::new_v4(),
        account_id,
        external_customer_id: Some("cus_1".to_string()),
        external_subscription_id: Some("sub_1".to_string()),
        plan_id: Some(plan_id),
        status: "active".to_string(),
        is_active: true,
        is_paused: false,
        credits,
        current_period_start: Some(now - ChronoDuration::days(2)),
        current_period_end: Some(now + ChronoDuration::days(28)),
        last_credit_refill_date: Some(now - ChronoDuration::days(2)),
        created_at: now,
        updated_at: now,
    }
}

fn router(store: &InMemoryBillingStore, stripe: MockStripeGateway) -> Router {
    let store = Arc::new(store.clone());
    app(
        &config(),
        BillingServices {
            entitlements: Arc::clone(&store),
            plans: Arc::clone(&store),
            invoices: store,
            stripe: Arc::new(stripe),
        },
    )
    .unwrap()
}

fn bearer(account_id: Uuid) -> String {
    let claims = IdentityClaims {
        sub: account_id.to_string(),
        email: Some("user@example.com".to_string()),
        aud: "authenticated".to_string(),
        exp: 9999999999,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap();
    format!("Bearer {token}")
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn spend_request(account_id: Uuid, amount: i32) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/credits/spend")
        .header(AUTHORIZATION, bearer(account_id))
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "amount": amount }).to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_check_is_public() {
    let app = router(&InMemoryBillingStore::new(), MockStripeGateway::new());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/health-check")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn credits_require_a_token() {
    let app = router(&InMemoryBillingStore::new(), MockStripeGateway::new());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/credits")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn spend_without_subscription_redirects_to_plans() {
    let app = router(&InMemoryBillingStore::new(), MockStripeGateway::new());

    let response = app.oneshot(spend_request(Uuid::new_v4(), 5)).await.unwrap();

    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let body = body_json(response).await;
    assert_eq!(body["redirect"], "https://app.example/plans");
}

#[tokio::test]
async fn spend_checks_balance_atomically() {
    let plan = monthly_plan();
    let store = InMemoryBillingStore::with_plans(vec![plan.clone()]);
    let account_id = Uuid::new_v4();
    store
        .put_entitlement(active_record(account_id, plan.id, 20))
        .await;

    let over = router(&store, MockStripeGateway::new())
        .oneshot(spend_request(account_id, 30))
        .await
        .unwrap();
    assert_eq!(over.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(over).await["error"], "insufficient_credits");

    let ok = router(&store, MockStripeGateway::new())
        .oneshot(spend_request(account_id, 5))
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);
    assert_eq!(body_json(ok).await["remaining"], 15);
}

#[tokio::test]
async fn expired_record_is_gated_on_access() {
    let plan = monthly_plan();
    let store = InMemoryBillingStore::with_plans(vec![plan.clone()]);
    let account_id = Uuid::new_v4();
    let mut record = active_record(account_id, plan.id, 20);
    record.current_period_start = Some(Utc::now() - ChronoDuration::days(31));
    record.current_period_end = Some(Utc::now() - ChronoDuration::seconds(1));
    store.put_entitlement(record).await;

    let response = router(&store, MockStripeGateway::new())
        .oneshot(
            Request::builder()
                .uri("/api/v1/credits")
                .header(AUTHORIZATION, bearer(account_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
}

#[tokio::test]
async fn dashboard_for_new_account_is_incomplete() {
    let app = router(&InMemoryBillingStore::new(), MockStripeGateway::new());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/billing/dashboard")
                .header(AUTHORIZATION, bearer(Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["entitlement"]["status"], "incomplete");
    assert_eq!(body["entitlement"]["credits"], 0);
}

#[tokio::test]
async fn webhook_without_signature_is_unauthorized() {
    let app = router(&InMemoryBillingStore::new(), MockStripeGateway::new());

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/webhooks/stripe")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn webhook_for_unknown_subscription_is_not_redelivered() {
    let mut stripe = MockStripeGateway::new();
    stripe
        .expect_verify_webhook_signature()
        .returning(|_, _| Ok(()));

    let payload = json!({
        "id": "evt_1",
        "type": "invoice.payment_failed",
        "data": { "object": {
            "id": "in_1",
            "customer": "cus_x",
            "subscription": "sub_missing",
            "billing_reason": "subscription_cycle",
            "amount_due": 1000,
            "currency": "usd",
            "lines": { "data": [{ "period": { "start": 1_735_689_600, "end": 1_738_368_000 } }] }
        }}
    });

    let response = router(&InMemoryBillingStore::new(), stripe)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/webhooks/stripe")
                .header("stripe-signature", "t=1,v1=abc")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "not_found");
}
