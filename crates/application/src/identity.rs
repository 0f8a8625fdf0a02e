use async_trait::async_trait;
use domain::UserId;

use crate::error::ApplicationError;

/// 外部身份服务的窄接口。
///
/// 连接在进入注册表之前必须先通过 `verify`；失败时返回
/// [`ApplicationError::Authentication`]。
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<UserId, ApplicationError>;
}
