use std::{net::SocketAddr, sync::Arc};

use application::{ConnectionRegistry, InMemoryMessageRepository};
use config::{AppConfig, JwtConfig};
use domain::UserId;
use tokio::{net::TcpListener, sync::oneshot};
use web_api::{router, AppState, JwtService};

pub const TEST_SECRET: &str = "integration-test-secret-at-least-32-chars";

/// 在随机端口上运行的测试服务器，drop 时优雅关闭
pub struct TestServer {
    pub addr: SocketAddr,
    pub registry: Arc<ConnectionRegistry>,
    pub jwt: JwtService,
    _shutdown: oneshot::Sender<()>,
}

impl TestServer {
    pub async fn spawn() -> Self {
        let mut config = AppConfig::default();
        config.jwt.secret = TEST_SECRET.to_string();
        config.websocket.idle_timeout_secs = 30;

        let jwt = JwtService::new(JwtConfig {
            secret: TEST_SECRET.to_string(),
            expiration_hours: 1,
        });
        let state = AppState::new(
            Arc::new(InMemoryMessageRepository::default()),
            Arc::new(jwt.clone()),
            &config,
        );
        let registry = state.registry.clone();

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, router(state).into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            registry,
            jwt,
            _shutdown: shutdown_tx,
        }
    }

    pub fn http(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    pub fn token(&self, user_id: UserId) -> String {
        self.jwt.generate_token(user_id).expect("token")
    }
}
