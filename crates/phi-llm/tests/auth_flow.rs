//! OAuth device-flow and refresh tests against a mock issuer.

use std::time::Duration;

use phi_llm::auth::{AuthClient, DeviceCode, OAuthClient};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn issuer_client(server: &MockServer) -> OAuthClient {
    OAuthClient::new()
        .with_issuer_base_url(server.uri())
        .with_client_id("app_test")
        .with_device_flow_timeout(Duration::from_secs(5))
}

#[tokio::test]
async fn device_flow_start_reads_codes_and_interval() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/accounts/deviceauth/usercode"))
        .and(body_partial_json(serde_json::json!({"client_id": "app_test"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "device_auth_id": "dev-1",
            "user_code": "ABCD-1234",
            "interval": "2",
        })))
        .mount(&server)
        .await;

    let code = issuer_client(&server)
        .start_device_flow()
        .await
        .expect("device flow should start");
    assert_eq!(code.device_code, "dev-1");
    assert_eq!(code.user_code, "ABCD-1234");
    assert_eq!(code.interval_seconds, 2);
    assert_eq!(code.verification_uri, format!("{}/codex/device", server.uri()));
}

#[tokio::test]
async fn device_flow_polls_until_approved_then_exchanges_the_code() {
    let server = MockServer::start().await;

    // first poll: still pending
    Mock::given(method("POST"))
        .and(path("/api/accounts/deviceauth/token"))
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    // second poll: approved
    Mock::given(method("POST"))
        .and(path("/api/accounts/deviceauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "authorization_code": "auth-code",
            "code_verifier": "verifier",
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "access-1",
            "refresh_token": "refresh-1",
            "expires_in": 3600,
        })))
        .mount(&server)
        .await;

    let code = DeviceCode {
        device_code: "dev-1".to_string(),
        user_code: "ABCD-1234".to_string(),
        verification_uri: String::new(),
        interval_seconds: 1,
    };
    let credentials = issuer_client(&server)
        .poll_device_flow(&code)
        .await
        .expect("poll should succeed after approval");
    assert_eq!(credentials.access_token, "access-1");
    assert_eq!(credentials.refresh_token, "refresh-1");
}

#[tokio::test]
async fn refresh_keeps_the_old_refresh_token_when_none_is_returned() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_partial_json(
            serde_json::json!({"grant_type": "refresh_token", "refresh_token": "old-refresh"}),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "access-2",
            "expires_in": 600,
        })))
        .mount(&server)
        .await;

    let credentials = issuer_client(&server)
        .refresh("old-refresh")
        .await
        .expect("refresh should succeed");
    assert_eq!(credentials.access_token, "access-2");
    assert_eq!(credentials.refresh_token, "old-refresh");
}

#[tokio::test]
async fn refresh_surfaces_issuer_errors_with_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
        .mount(&server)
        .await;

    let error = issuer_client(&server)
        .refresh("stale")
        .await
        .err()
        .expect("refresh should fail");
    let message = error.to_string();
    assert!(message.contains("status=400"), "unexpected error: {message}");
    assert!(message.contains("invalid_grant"), "unexpected error: {message}");
}
