//! 主应用程序入口
//!
//! 加载配置，选择消息存储，启动 Axum Web API 服务。

use std::sync::Arc;

use application::{InMemoryMessageRepository, MessageRepository};
use config::AppConfig;
use infrastructure::Infrastructure;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志，未设置 RUST_LOG 时默认 info
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::load()?;
    if config.uses_dev_secret() {
        tracing::warn!("使用开发环境默认 JWT 密钥，生产环境请设置 CHAT_JWT__SECRET");
    }

    let repository: Arc<dyn MessageRepository> = if config.database.url.is_some() {
        let infrastructure = Infrastructure::connect(&config.database).await?;
        infrastructure.message_repository
    } else {
        tracing::warn!("未配置数据库，消息只保存在内存中");
        Arc::new(InMemoryMessageRepository::default())
    };

    let jwt_service = Arc::new(JwtService::new(config.jwt.clone()));
    let state = AppState::new(repository, jwt_service, &config);

    let app = router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;

    tracing::info!("聊天服务器启动在 http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("服务器已停止");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "监听关闭信号失败");
    }
}
