pub mod jwt;

use async_trait::async_trait;

use crate::models::Identity;

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> anyhow::Result<Identity>;

    async fn display_name(&self, uid: &str) -> anyhow::Result<Option<String>>;
}
