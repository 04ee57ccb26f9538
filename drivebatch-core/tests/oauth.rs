use drivebatch_core::OAuthClient;
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[test]
fn authorize_url_includes_offline_consent_params() {
    let client = OAuthClient::with_base_url("https://oauth.example", "client-id", "secret")
        .expect("client should build");
    let url = client
        .authorize_url(
            "http://localhost:3001/oauth2callback",
            &["https://www.googleapis.com/auth/drive"],
            Some("state-1"),
        )
        .expect("url should build");

    assert_eq!(url.path(), "/o/oauth2/v2/auth");
    let query = url.query().unwrap_or_default();
    assert!(query.contains("response_type=code"));
    assert!(query.contains("client_id=client-id"));
    assert!(query.contains("redirect_uri=http%3A%2F%2Flocalhost%3A3001%2Foauth2callback"));
    assert!(query.contains("access_type=offline"));
    assert!(query.contains("prompt=consent"));
    assert!(query.contains("state=state-1"));
}

#[test]
fn authorize_url_joins_scopes_with_spaces() {
    let client = OAuthClient::with_base_url("https://oauth.example", "client-id", "secret")
        .expect("client should build");
    let url = client
        .authorize_url(
            "http://localhost:3001/oauth2callback",
            &[
                "https://www.googleapis.com/auth/drive",
                "https://www.googleapis.com/auth/drive.readonly",
            ],
            None,
        )
        .expect("url should build");

    let scope = url
        .query_pairs()
        .find(|(key, _)| key == "scope")
        .map(|(_, value)| value.into_owned())
        .expect("scope param present");
    assert_eq!(
        scope,
        "https://www.googleapis.com/auth/drive https://www.googleapis.com/auth/drive.readonly"
    );
}

#[tokio::test]
async fn exchange_code_posts_form_data() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=auth-code"))
        .and(body_string_contains("client_id=client-id"))
        .and(body_string_contains("client_secret=secret"))
        .and(body_string_contains(
            "redirect_uri=http%3A%2F%2Flocalhost%3A3001%2Foauth2callback",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "token",
            "token_type": "Bearer",
            "expires_in": 3599,
            "refresh_token": "refresh",
            "scope": "https://www.googleapis.com/auth/drive"
        })))
        .mount(&server)
        .await;

    let client = OAuthClient::with_base_url(&server.uri(), "client-id", "secret").unwrap();
    let token = client
        .exchange_code("auth-code", Some("http://localhost:3001/oauth2callback"))
        .await
        .unwrap();

    assert_eq!(token.access_token, "token");
    assert_eq!(token.token_type, "Bearer");
    assert_eq!(token.expires_in, Some(3599));
    assert_eq!(token.refresh_token.as_deref(), Some("refresh"));
}

#[tokio::test]
async fn refresh_token_posts_refresh_grant() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "new-token",
            "token_type": "Bearer",
            "expires_in": 3599
        })))
        .mount(&server)
        .await;

    let client = OAuthClient::with_base_url(&server.uri(), "client-id", "secret").unwrap();
    let token = client.refresh_token("refresh-1").await.unwrap();

    assert_eq!(token.access_token, "new-token");
    assert!(token.refresh_token.is_none());
}

#[tokio::test]
async fn exchange_code_surfaces_provider_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({ "error": "invalid_grant" })),
        )
        .mount(&server)
        .await;

    let client = OAuthClient::with_base_url(&server.uri(), "client-id", "secret").unwrap();
    let err = client.exchange_code("bad-code", None).await.unwrap_err();

    assert!(err.to_string().contains("invalid_grant"));
}
