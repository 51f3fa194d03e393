//! HTTP 接口
//!
//! Routes:
//! - GET   /mu/users                 mu 管理端拉取用户 (token 头或 key 参数)
//! - POST  /mu/users/{id}/traffic    mu 管理端上报流量
//! - GET   /api/client-config        Bearer token, 下发客户端配置
//! - PATCH /api/accounts/{id}        管理员, 启用/停用账户并同步
//! - POST  /api/sync                 管理员, 手动同步

mod error;
pub mod mu;
pub mod user;

pub use error::ApiError;

use std::sync::Arc;

use axum::{
    routing::{get, patch, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::account::AccountStore;
use crate::config::DeploymentSettings;
use crate::pipeline::Synchronizer;
use crate::token::TokenSigner;

pub struct AppState {
    pub store: Arc<AccountStore>,
    pub deployment: Arc<DeploymentSettings>,
    pub synchronizer: Arc<Synchronizer>,
    pub signer: TokenSigner,
    pub mu_token: String,
}

pub fn make_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/mu/users", get(mu::list_users))
        .route("/mu/users/{id}/traffic", post(mu::report_traffic))
        .route("/api/client-config", get(user::client_config))
        .route("/api/accounts/{id}", patch(user::update_account))
        .route("/api/sync", post(user::sync_now))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{Account, AccountSource, ShadowsocksCredential, VmessCredential};
    use crate::config::{DaemonLogSettings, VmessSettings};
    use crate::pipeline::{ConfigWriter, Reloader};
    use crate::token::{Claims, DEFAULT_TTL};
    use crate::utils::ReloadError;
    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt as _;
    use serde_json::{json, Value};
    use tower::ServiceExt as _;

    struct StaticReloader(bool);

    #[async_trait]
    impl Reloader for StaticReloader {
        async fn signal_reload(&self) -> Result<(), ReloadError> {
            if self.0 {
                Ok(())
            } else {
                Err(ReloadError::NotRunning("test".to_string()))
            }
        }

        fn describe(&self) -> String {
            "static".to_string()
        }
    }

    fn account(id: &str, enabled: bool) -> Account {
        Account {
            id: id.to_string(),
            email: format!("{id}@example.com"),
            vmess: VmessCredential {
                id: "b831381d-6324-4d53-ad4f-8cda48b30811".to_string(),
                alter_id: 64,
            },
            shadowsocks: ShadowsocksCredential {
                password: format!("{id}-pw"),
                method: "aes-256-cfb".to_string(),
                port: 10001,
            },
            enabled,
            updated_at: 42,
        }
    }

    struct Harness {
        state: Arc<AppState>,
        _dir: tempfile::TempDir,
    }

    fn harness(reload_ok: bool) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            AccountStore::with_accounts(vec![account("u1", true), account("u2", false)]).unwrap(),
        );
        let deployment = Arc::new(DeploymentSettings {
            proxy_host: "proxy.example.com".to_string(),
            vmess: VmessSettings {
                host: "proxy.example.com".to_string(),
                port: 10086,
                network: Default::default(),
                tcp: None,
                kcp: None,
                web_socket: Default::default(),
                tls: Default::default(),
            },
            log: DaemonLogSettings::default(),
        });
        let synchronizer = Arc::new(Synchronizer::new(
            Arc::clone(&deployment),
            store.clone(),
            ConfigWriter::new(dir.path().join("v2ray.json")),
            Arc::new(StaticReloader(reload_ok)),
        ));
        Harness {
            state: Arc::new(AppState {
                store,
                deployment,
                synchronizer,
                signer: TokenSigner::new("jwt-secret"),
                mu_token: "mu-secret".to_string(),
            }),
            _dir: dir,
        }
    }

    fn bearer(state: &AppState, sub: &str, admin: bool) -> String {
        let token = state
            .signer
            .encode(Claims::new(sub, admin), DEFAULT_TTL)
            .unwrap();
        format!("Bearer {token}")
    }

    async fn body_json(resp: axum::response::Response) -> Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_mu_users_requires_token() {
        let h = harness(true);
        let resp = make_router(h.state.clone())
            .oneshot(Request::builder().uri("/mu/users").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_mu_users_lists_all_accounts() {
        let h = harness(true);
        let resp = make_router(h.state.clone())
            .oneshot(
                Request::builder()
                    .uri("/mu/users?key=mu-secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["msg"], "ok");
        assert_eq!(
            json["data"][0],
            json!({
                "id": "u1",
                "email": "u1@example.com",
                "passwd": "u1-pw",
                "t": 42,
                "u": 0,
                "d": 0,
                "transfer_enable": 200000000,
                "port": 10001,
                "switch": 1,
                "enable": 1,
                "method": "aes-256-cfb"
            })
        );
        assert_eq!(json["data"][1]["enable"], 0);
    }

    #[tokio::test]
    async fn test_traffic_report() {
        let h = harness(true);
        let post = |uri: &str, body: &'static str| {
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("token", "mu-secret")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap()
        };

        let resp = make_router(h.state.clone())
            .oneshot(post("/mu/users/missing/traffic", r#"{"u":1}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = make_router(h.state.clone())
            .oneshot(post("/mu/users/u1/traffic", r#"{"u":0,"d":0}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = make_router(h.state.clone())
            .oneshot(post("/mu/users/u1/traffic", r#"{"u":100,"d":200}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, json!({ "ret": 1, "msg": "ok" }));

        let touched = h.state.store.get_account("u1").await.unwrap().unwrap();
        assert!(touched.updated_at > 42);

        for body in [r#"{"u":"100","d":"200"}"#, r#"{"u":100,"d":-1}"#, r#"{"u":1.5}"#] {
            let resp = make_router(h.state.clone())
                .oneshot(post("/mu/users/u1/traffic", body))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK, "{body}");
        }

        let resp = make_router(h.state.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/mu/users/u1/traffic?key=mu-secret")
                    .header("content-type", "application/x-www-form-urlencoded")
                    .body(Body::from("u=&d="))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_client_config_for_disabled_account() {
        let h = harness(true);
        let auth = bearer(&h.state, "u2", false);
        let resp = make_router(h.state.clone())
            .oneshot(
                Request::builder()
                    .uri("/api/client-config")
                    .header("authorization", auth)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["inbound"]["protocol"], "socks");
        assert_eq!(json["outbound"]["settings"]["vnext"][0]["port"], 10086);
    }

    #[tokio::test]
    async fn test_update_account_requires_admin() {
        let h = harness(true);
        let auth = bearer(&h.state, "u1", false);
        let resp = make_router(h.state.clone())
            .oneshot(
                Request::builder()
                    .method("PATCH")
                    .uri("/api/accounts/u2")
                    .header("authorization", auth)
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"enabled":true}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_update_account_syncs_config() {
        let h = harness(true);
        let auth = bearer(&h.state, "admin", true);
        let resp = make_router(h.state.clone())
            .oneshot(
                Request::builder()
                    .method("PATCH")
                    .uri("/api/accounts/u2")
                    .header("authorization", auth)
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"enabled":true}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["account"]["enabled"], true);
        assert_eq!(json["sync"]["clients"], 2);
    }

    #[tokio::test]
    async fn test_reload_failure_maps_to_bad_gateway() {
        let h = harness(false);
        let auth = bearer(&h.state, "admin", true);
        let resp = make_router(h.state.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/sync")
                    .header("authorization", auth)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        assert!(h.state.synchronizer.path().exists());
    }
}
