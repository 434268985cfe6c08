use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use super::IdentityVerifier;
use crate::db::{queries, DocumentStore};
use crate::models::{Identity, Role};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    pub exp: usize,
}

/// HS256 bearer tokens; display names come from the `users` collection.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
    store: Arc<dyn DocumentStore>,
}

impl JwtVerifier {
    pub fn new(secret: &str, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
            store,
        }
    }
}

#[async_trait]
impl IdentityVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> anyhow::Result<Identity> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .context("invalid bearer token")?;
        let claims = data.claims;

        Ok(Identity {
            uid: claims.sub,
            email: claims.email,
            role: Role::parse(claims.role.as_deref().unwrap_or_default()),
        })
    }

    async fn display_name(&self, uid: &str) -> anyhow::Result<Option<String>> {
        let profile = queries::get_user_profile(self.store.as_ref(), uid).await?;
        Ok(profile.map(|p| p.display_name))
    }
}
