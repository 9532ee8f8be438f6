use bierp_auth::{DeviceAction, JwtClaims, Permission, Role};
use bierp_core::UserId;
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::{Value, json};

const SECRET: &str = "test-secret";

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod over a fresh in-memory store, on an ephemeral port.
        let app = bierp_api::app::build_app(SECRET.to_string());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            client: reqwest::Client::new(),
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(&self, token: &str, path: &str) -> (StatusCode, Value) {
        let res = self
            .client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap())
    }

    async fn post(&self, token: &str, path: &str, body: Value) -> (StatusCode, Value) {
        let res = self
            .client
            .post(self.url(path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap())
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn mint_jwt(role: Role, granted: Vec<Permission>) -> String {
    let now = Utc::now();
    let claims = JwtClaims {
        sub: UserId::new(),
        role,
        security_level: None,
        granted,
        revoked: Vec::new(),
        issued_at: now - ChronoDuration::seconds(5),
        expires_at: now + ChronoDuration::minutes(10),
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .expect("failed to encode jwt")
}

#[tokio::test]
async fn health_needs_no_token() {
    let srv = TestServer::spawn().await;
    let res = srv.client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn auth_required_for_protected_endpoints() {
    let srv = TestServer::spawn().await;

    let res = srv.client.get(srv.url("/whoami")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "UNAUTHORIZED");

    let res = srv
        .client
        .get(srv.url("/invoices"))
        .bearer_auth("not-a-jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn whoami_reflects_the_token() {
    let srv = TestServer::spawn().await;
    let token = mint_jwt(Role::Salesperson, vec![Permission::Device(DeviceAction::Create)]);

    let (status, body) = srv.get(&token, "/whoami").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["role"], "salesperson");
    assert_eq!(body["data"]["security_level"], 1);
    let permissions = body["data"]["permissions"].as_array().unwrap();
    assert!(permissions.iter().any(|p| p == "devices.create"));
    // Granted, but above the caller's security level.
    assert!(!permissions.iter().any(|p| p == "reports.view"));
}

#[tokio::test]
async fn purchase_registers_one_device_per_unit() {
    let srv = TestServer::spawn().await;
    let owner = mint_jwt(Role::Owner, vec![]);

    let (status, body) = srv
        .post(
            &owner,
            "/invoices",
            json!({
                "type": "purchase",
                "items": [{ "product_id": "P1", "quantity": 3, "price": 1000 }]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let invoice = &body["data"];
    assert_eq!(invoice["status"], "completed");
    assert_eq!(invoice["total"], 3000);
    let invoice_id = invoice["id"].as_str().unwrap().to_string();

    let (status, body) = srv.get(&owner, "/devices?product_id=P1").await;
    assert_eq!(status, StatusCode::OK);
    let devices = body["data"]["items"].as_array().unwrap();
    assert_eq!(devices.len(), 3);
    for device in devices {
        assert_eq!(device["status"], "new");
        assert_eq!(device["warehouse_id"], "inspection");
        assert_eq!(device["purchase_cost"], 1000);
        assert_eq!(device["purchase_invoice_id"], invoice_id.as_str());
    }

    let serial = devices[0]["serial_number"].as_str().unwrap();
    let (status, body) = srv.get(&owner, &format!("/devices/scan/{serial}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["serial_number"], serial);
}

#[tokio::test]
async fn non_owner_cancel_parks_a_void_request() {
    let srv = TestServer::spawn().await;
    let manager = mint_jwt(Role::Manager, vec![]);
    let owner = mint_jwt(Role::Owner, vec![]);

    let (status, body) = srv
        .post(
            &manager,
            "/invoices",
            json!({
                "type": "sale",
                "items": [{ "product_id": "P1", "quantity": 1, "price": 500 }]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let invoice_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = srv
        .post(
            &manager,
            &format!("/invoices/{invoice_id}/cancel"),
            json!({ "reason": "customer changed their mind" }),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED, "{body}");
    assert_eq!(body["data"]["status"], "pending");
    let approval_id = body["data"]["approval_id"].as_str().unwrap().to_string();
    assert!(
        body["data"]["approval_number"]
            .as_str()
            .unwrap()
            .starts_with("APR-")
    );

    let (_, body) = srv.get(&manager, &format!("/invoices/{invoice_id}")).await;
    assert_eq!(body["data"]["status"], "completed");

    let (status, body) = srv.get(&owner, "/approvals/pending").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    // Only the owner decides.
    let (status, body) = srv
        .post(&manager, &format!("/approvals/{approval_id}/approve"), json!({}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "OWNER_ONLY");

    let (status, _) = srv
        .post(&owner, &format!("/approvals/{approval_id}/approve"), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = srv.get(&owner, &format!("/invoices/{invoice_id}")).await;
    assert_eq!(body["data"]["status"], "voided");
}

#[tokio::test]
async fn owner_bypass_cancels_immediately() {
    let srv = TestServer::spawn().await;
    let owner = mint_jwt(Role::Owner, vec![]);

    let (_, body) = srv
        .post(
            &owner,
            "/invoices",
            json!({
                "type": "sale",
                "items": [{ "product_id": "P9", "quantity": 2, "price": 250 }]
            }),
        )
        .await;
    let invoice_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = srv
        .post(
            &owner,
            &format!("/invoices/{invoice_id}/cancel-now"),
            json!({ "reason": "duplicate" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "cancelled");

    let (status, body) = srv
        .post(
            &owner,
            &format!("/invoices/{invoice_id}/cancel"),
            json!({ "reason": "again" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "ALREADY_CANCELLED");

    let (_, body) = srv.get(&owner, "/approvals?status=all").await;
    assert!(body["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn illegal_transition_is_rejected() {
    let srv = TestServer::spawn().await;
    let owner = mint_jwt(Role::Owner, vec![]);

    let (_, body) = srv
        .post(
            &owner,
            "/invoices",
            json!({
                "type": "sale",
                "items": [{ "product_id": "P1", "quantity": 1, "price": 10 }]
            }),
        )
        .await;
    let invoice_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = srv
        .post(
            &owner,
            &format!("/invoices/{invoice_id}/transition"),
            json!({ "status": "draft" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_TRANSITION");
}

#[tokio::test]
async fn invalid_bodies_are_rejected_before_any_work() {
    let srv = TestServer::spawn().await;
    let owner = mint_jwt(Role::Owner, vec![]);

    let (status, body) = srv
        .post(&owner, "/invoices", json!({ "type": "sale", "items": [] }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "VALIDATION_ERROR");

    let (status, _) = srv
        .post(&owner, "/invoices", json!({ "type": "barter", "items": [] }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = srv.get(&owner, "/invoices").await;
    assert_eq!(body["data"]["total"], 0);
}

#[tokio::test]
async fn denied_requests_are_403_and_audited() {
    let srv = TestServer::spawn().await;
    let viewer = mint_jwt(Role::Viewer, vec![]);
    let owner = mint_jwt(Role::Owner, vec![]);

    let (status, body) = srv.get(&viewer, "/audit").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["success"], false);
    assert_eq!(body["required_permission"], "system.audit.view");

    let (status, body) = srv.get(&owner, "/audit?event_type=permission_denied").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);
}

#[tokio::test]
async fn missing_device_is_404_in_arabic() {
    let srv = TestServer::spawn().await;
    let owner = mint_jwt(Role::Owner, vec![]);

    let (status, body) = srv
        .get(&owner, &format!("/devices/{}", uuid_like()))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "الجهاز غير موجود");
}

#[tokio::test]
async fn device_delete_is_always_rejected() {
    let srv = TestServer::spawn().await;
    let owner = mint_jwt(Role::Owner, vec![]);

    let res = srv
        .client
        .delete(srv.url(&format!("/devices/{}", uuid_like())))
        .bearer_auth(&owner)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "DELETION_REQUIRES_APPROVAL");
}

#[tokio::test]
async fn reports_export_csv_and_reject_unknown_types() {
    let srv = TestServer::spawn().await;
    let owner = mint_jwt(Role::Owner, vec![]);

    let res = srv
        .client
        .get(srv.url("/reports/export/inventory"))
        .bearer_auth(&owner)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(
        res.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/csv")
    );

    let (status, body) = srv.get(&owner, "/reports/export/payroll").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "VALIDATION_ERROR");
}

fn uuid_like() -> String {
    UserId::new().to_string()
}
