#[path = "common/mod.rs"]
mod common;

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use serde_json::{Value, json};
use tower::ServiceExt; // for oneshot

use common::{ACCOUNT_ID, PASSWORD, Fixture, current_code, enable, fixture};
use marketplace_2fa::{
    routes,
    settings::{KEY_ADMIN_ENABLED, KEY_ADMIN_REQUIRED, SettingValue},
    state::AppState,
};

fn build_app(fx: &Fixture) -> Router {
    routes::router(Arc::new(AppState {
        two_factor: fx.service.clone(),
    }))
}

async fn send(app: Router, method: &str, path: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(path);
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let res = app.oneshot(req).await.expect("request failed");
    let status = res.status();
    let bytes = to_bytes(res.into_body(), 1024 * 1024)
        .await
        .expect("body read failed");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("response is not JSON")
    };
    (status, value)
}

#[tokio::test]
async fn setup_confirm_verify_over_http() {
    let fx = fixture().await;
    let base = format!("/accounts/{ACCOUNT_ID}/2fa");

    let (status, setup) = send(
        build_app(&fx),
        "POST",
        &format!("{base}/setup"),
        Some(json!({ "password": PASSWORD })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(setup["qr_code_png"].as_str().is_some_and(|s| !s.is_empty()));
    assert_eq!(setup["backup_codes"].as_array().unwrap().len(), 8);

    let secret = setup["secret"].as_str().unwrap().to_string();
    let (status, confirmed) = send(
        build_app(&fx),
        "POST",
        &format!("{base}/confirm"),
        Some(json!({
            "secret": secret,
            "token": current_code(&secret),
            "backup_codes": setup["backup_codes"],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(confirmed["enabled"], true);
    assert_eq!(confirmed["backup_codes_remaining"], 8);

    let code = setup["backup_codes"][0].as_str().unwrap();
    let (status, verified) = send(
        build_app(&fx),
        "POST",
        &format!("{base}/verify"),
        Some(json!({ "token": code })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verified["verified"], true);
    assert_eq!(verified["method"], "backup_code");
    assert_eq!(verified["remaining"], 7);

    let (status, body) = send(
        build_app(&fx),
        "POST",
        &format!("{base}/verify"),
        Some(json!({ "token": code })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid token");
}

#[tokio::test]
async fn error_statuses() {
    let fx = fixture().await;

    let (status, _) = send(
        build_app(&fx),
        "POST",
        &format!("/accounts/{ACCOUNT_ID}/2fa/setup"),
        Some(json!({ "password": "nope" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(build_app(&fx), "GET", "/accounts/ghost/2fa", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        build_app(&fx),
        "POST",
        &format!("/accounts/{ACCOUNT_ID}/2fa/backup-codes"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    fx.settings_down();
    let (status, body) = send(
        build_app(&fx),
        "GET",
        &format!("/accounts/{ACCOUNT_ID}/2fa/required?role=admin"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "configuration unavailable");
}

#[tokio::test]
async fn policy_endpoints() {
    let fx = fixture().await;
    fx.set(KEY_ADMIN_ENABLED, SettingValue::Bool(true));
    fx.set(KEY_ADMIN_REQUIRED, SettingValue::Bool(true));

    let (status, body) = send(
        build_app(&fx),
        "GET",
        &format!("/accounts/{ACCOUNT_ID}/2fa/required?role=admin"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["required"], true);
    assert_eq!(body["requirement"], "required");

    let (_, body) = send(
        build_app(&fx),
        "GET",
        &format!("/accounts/{ACCOUNT_ID}/2fa/challenge?role=user"),
        None,
    )
    .await;
    assert_eq!(body["challenge"], "none");

    enable(&fx.service, ACCOUNT_ID).await;
    let (_, body) = send(
        build_app(&fx),
        "GET",
        &format!("/accounts/{ACCOUNT_ID}/2fa/challenge?role=user"),
        None,
    )
    .await;
    assert_eq!(body["challenge"], "verify");
}

#[tokio::test]
async fn status_disable_and_remove() {
    let fx = fixture().await;
    enable(&fx.service, ACCOUNT_ID).await;
    let base = format!("/accounts/{ACCOUNT_ID}/2fa");

    let (status, body) = send(build_app(&fx), "GET", &base, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enabled"], true);

    let (status, body) = send(
        build_app(&fx),
        "POST",
        &format!("{base}/disable"),
        Some(json!({ "password": PASSWORD })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enabled"], false);
    assert_eq!(body["backup_codes_remaining"], 0);

    fx.accounts.remove(ACCOUNT_ID).await;
    let (status, _) = send(build_app(&fx), "DELETE", &base, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(fx.records.get_record(ACCOUNT_ID).await.unwrap().is_none());
}

#[tokio::test]
async fn delete_is_refused_while_the_account_exists() {
    let fx = fixture().await;
    enable(&fx.service, ACCOUNT_ID).await;
    let base = format!("/accounts/{ACCOUNT_ID}/2fa");

    let (status, body) = send(build_app(&fx), "DELETE", &base, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "account still exists");

    let (_, body) = send(build_app(&fx), "GET", &base, None).await;
    assert_eq!(body["enabled"], true);
}

#[tokio::test]
async fn settings_refresh_returns_the_reloaded_snapshot() {
    let fx = fixture().await;
    fx.set(KEY_ADMIN_ENABLED, SettingValue::Bool(true));

    let (status, body) = send(build_app(&fx), "POST", "/settings/2fa/refresh", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["admin_enabled"], true);
    assert_eq!(body["backup_code_count"], 8);
    assert_eq!(body["issuer"], "Marketplace");

    fx.settings_down();
    let (status, _) = send(build_app(&fx), "POST", "/settings/2fa/refresh", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
