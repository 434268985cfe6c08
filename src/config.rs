use std::env;

#[derive(Clone, Debug, PartialEq)]
pub enum GatewayEnv {
    Sandbox,
    Production,
}

impl GatewayEnv {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "production" | "prod" | "live" => GatewayEnv::Production,
            _ => GatewayEnv::Sandbox,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub auth_secret: String,
    pub phonepe_client_id: String,
    pub phonepe_client_secret: String,
    pub phonepe_client_version: String,
    pub phonepe_env: GatewayEnv,
    pub webhook_secret: String,
    /// Base URL the gateway redirects back to, e.g. `https://api.example.com`.
    pub public_base_url: String,
    /// Web frontend hosting the success/failure/verify pages.
    pub frontend_url: String,
    pub app_deep_link_scheme: String,
    pub strict_callback_codes: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "tripdesk.db".to_string()),
            auth_secret: env::var("AUTH_SECRET").unwrap_or_else(|_| "changeme".to_string()),
            phonepe_client_id: env::var("PHONEPE_CLIENT_ID").unwrap_or_default(),
            phonepe_client_secret: env::var("PHONEPE_CLIENT_SECRET").unwrap_or_default(),
            phonepe_client_version: env::var("PHONEPE_CLIENT_VERSION")
                .unwrap_or_else(|_| "1".to_string()),
            phonepe_env: GatewayEnv::parse(
                &env::var("PHONEPE_ENV").unwrap_or_else(|_| "sandbox".to_string()),
            ),
            webhook_secret: env::var("PAYMENT_WEBHOOK_SECRET").unwrap_or_default(),
            public_base_url: trim_base(
                env::var("PUBLIC_BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string()),
            ),
            frontend_url: trim_base(
                env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:3001".to_string()),
            ),
            app_deep_link_scheme: env::var("APP_DEEP_LINK_SCHEME")
                .unwrap_or_else(|_| "tripdesk".to_string()),
            strict_callback_codes: env::var("STRICT_CALLBACK_CODES")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        }
    }
}

fn trim_base(url: String) -> String {
    url.trim_end_matches('/').to_string()
}
