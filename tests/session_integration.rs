// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Integration tests for login, dispatch and device discovery using wiremock.

use std::io;
use std::sync::{Arc, Mutex};

use coolkit_client::discovery::DeviceDiscovery;
use coolkit_client::session::sign;
use coolkit_client::{
    AppCredentials, AuthSession, ClientConfig, ClientEvent, DeviceRepository, Endpoints, Error,
    EventBus, SessionState,
};
use serde_json::json;
use tracing_subscriber::fmt::MakeWriter;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

const APP_SECRET: &str = "app-secret";

/// Matches requests whose `Authorization: Sign ..` header signs the body.
struct SignedBody;

impl Match for SignedBody {
    fn matches(&self, request: &Request) -> bool {
        let expected = format!("Sign {}", sign::sign(APP_SECRET.as_bytes(), &request.body));
        request
            .headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value == expected)
    }
}

/// Collects formatted log lines in memory.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn config(server: &MockServer) -> ClientConfig {
    ClientConfig::new(AppCredentials::new("app-id", APP_SECRET)).with_endpoints(Endpoints::Fixed {
        api: server.uri(),
        dispatch: server.uri(),
        relay: None,
    })
}

fn session(server: &MockServer) -> AuthSession {
    AuthSession::new(config(server)).unwrap()
}

async fn mount_dispatch(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/dispatch/app"))
        .and(header("authorization", "Bearer token-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": 0,
            "reason": "ok",
            "domain": "eu-pconnect3.coolkit.cc",
            "IP": "52.57.118.192",
            "port": 443
        })))
        .expect(1)
        .mount(server)
        .await;
}

// ============================================================================
// Login
// ============================================================================

mod login {
    use super::*;

    #[tokio::test]
    async fn stores_token_key_and_relay_host() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/user/login"))
            .and(header("content-type", "application/json;charset=UTF-8"))
            .and(SignedBody)
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "at": "token-1",
                "rt": "refresh",
                "user": {"apikey": "user-key", "email": "user@example.com"},
                "region": "eu"
            })))
            .expect(1)
            .mount(&server)
            .await;
        mount_dispatch(&server).await;

        let session = session(&server);
        session.login("user@example.com", "pw", "eu").await.unwrap();

        assert!(session.is_ready());
        assert_eq!(session.region().as_deref(), Some("eu"));
        assert_eq!(session.bearer_token().as_deref(), Some("token-1"));
        assert_eq!(session.user_api_key().as_deref(), Some("user-key"));
        assert_eq!(
            session.relay_url().unwrap(),
            "wss://eu-pconnect3.coolkit.cc:8080/api/ws"
        );
    }

    #[tokio::test]
    async fn debug_logs_leave_out_credentials() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/user/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "at": "secret-token",
                "rt": "secret-refresh",
                "user": {"apikey": "secret-user-key"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/dispatch/app"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": 0,
                "domain": "eu-pconnect3.coolkit.cc"
            })))
            .mount(&server)
            .await;

        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter("coolkit_client=debug")
            .with_writer(logs.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let session = session(&server);
        session.login("user@example.com", "pw", "eu").await.unwrap();
        assert_eq!(session.bearer_token().as_deref(), Some("secret-token"));

        let output = logs.contents();
        assert!(output.contains("Received API reply"), "{output}");
        assert!(!output.contains("secret-token"), "{output}");
        assert!(!output.contains("secret-refresh"), "{output}");
        assert!(!output.contains("secret-user-key"), "{output}");
    }

    #[tokio::test]
    async fn email_username_is_sent_as_email() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/user/login"))
            .and(body_partial_json(json!({
                "email": "user@example.com",
                "password": "pw",
                "appid": "app-id",
                "version": "6",
                "os": "iOS"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "at": "token-1",
                "user": {"apikey": "user-key"}
            })))
            .expect(1)
            .mount(&server)
            .await;
        mount_dispatch(&server).await;

        session(&server)
            .login("user@example.com", "pw", "eu")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn phone_username_is_sent_as_phone_number() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/user/login"))
            .and(body_partial_json(json!({"phoneNumber": "+15551234567"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "at": "token-1",
                "user": {"apikey": "user-key"}
            })))
            .expect(1)
            .mount(&server)
            .await;
        mount_dispatch(&server).await;

        session(&server)
            .login("+15551234567", "pw", "us")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rejected_credentials_fail_without_dispatch() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/user/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": 301,
                "info": "wrong account or password"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/dispatch/app"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let session = session(&server);
        let err = session.login("user@example.com", "bad", "eu").await.unwrap_err();

        match err {
            Error::Authentication { code, message } => {
                assert_eq!(code, 301);
                assert_eq!(message, "wrong account or password");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!session.is_ready());
        assert!(session.bearer_token().is_none());
    }

    #[tokio::test]
    async fn http_error_without_body_reports_status() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/user/login"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = session(&server)
            .login("user@example.com", "pw", "eu")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Authentication { code: 401, .. }));
    }

    #[tokio::test]
    async fn dispatch_failure_is_reported() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/user/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "at": "token-1",
                "user": {"apikey": "user-key"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/dispatch/app"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": 500,
                "reason": "no relay"
            })))
            .mount(&server)
            .await;

        let session = session(&server);
        let err = session.login("user@example.com", "pw", "eu").await.unwrap_err();

        assert!(matches!(err, Error::Dispatch { code: 500, .. }));
        // Login itself went through
        assert_eq!(session.bearer_token().as_deref(), Some("token-1"));
        assert!(!session.is_ready());
    }
}

// ============================================================================
// Discovery
// ============================================================================

mod discovery {
    use super::*;

    fn discovery(server: &MockServer) -> (DeviceDiscovery, DeviceRepository, EventBus) {
        let session = session(server);
        session.restore(SessionState {
            region: Some("eu".to_string()),
            bearer_token: Some("token-1".to_string()),
            user_api_key: Some("user-key".to_string()),
            relay_host: Some("relay.local".to_string()),
        });
        let repository = DeviceRepository::new();
        let events = EventBus::new();
        let discovery = DeviceDiscovery::new(Arc::new(session), repository.clone(), events.clone());
        (discovery, repository, events)
    }

    fn plug(id: &str) -> serde_json::Value {
        json!({
            "deviceid": id,
            "apikey": "user-key",
            "name": format!("Plug {id}"),
            "brandName": "SONOFF",
            "productModel": "S26",
            "online": true,
            "params": {"switch": "off"}
        })
    }

    #[tokio::test]
    async fn registers_devices_from_bare_array() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/user/device"))
            .and(header("authorization", "Bearer token-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([plug("d1"), plug("d2")])))
            .mount(&server)
            .await;

        let (discovery, repository, events) = discovery(&server);
        let mut rx = events.subscribe();

        assert_eq!(discovery.discover().await.unwrap(), 2);
        assert_eq!(repository.len(), 2);
        assert_eq!(
            repository.get_device("d1").unwrap().to_string(),
            "[d1] SONOFF S26"
        );
        assert!(matches!(rx.try_recv().unwrap(), ClientEvent::DeviceAdded { .. }));

        // Second poll adds nothing
        assert_eq!(discovery.discover().await.unwrap(), 0);
    }

    #[test]
    fn registration_logs_device_label() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter("coolkit_client=info")
            .with_writer(logs.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let discovery = DeviceDiscovery::new(
            Arc::new(AuthSession::new(ClientConfig::new(AppCredentials::new("id", "secret"))).unwrap()),
            DeviceRepository::new(),
            EventBus::new(),
        );
        assert_eq!(discovery.register_documents([plug("d1")]), 1);

        let output = logs.contents();
        assert!(output.contains("Registered device"), "{output}");
        assert!(output.contains("[d1] SONOFF S26"), "{output}");
    }

    #[tokio::test]
    async fn registers_devices_from_wrapped_list() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/user/device"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": 0,
                "devicelist": [plug("d1")]
            })))
            .mount(&server)
            .await;

        let (discovery, repository, _) = discovery(&server);
        assert_eq!(discovery.discover().await.unwrap(), 1);
        assert!(repository.has_device("d1"));
    }

    #[tokio::test]
    async fn server_error_is_reported() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/user/device"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": 401,
                "msg": "token expired"
            })))
            .mount(&server)
            .await;

        let (discovery, repository, _) = discovery(&server);
        let err = discovery.discover().await.unwrap_err();

        match err {
            Error::Discovery { code, message } => {
                assert_eq!(code, 401);
                assert_eq!(message, "token expired");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(repository.is_empty());
    }
}
