//! API configuration from environment variables

/// Runtime configuration for the API server
#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// HS256 secret shared with the identity provider; bearer tokens are
    /// verified locally against it.
    pub jwt_secret: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
        let jwt_secret = std::env::var("AUTH_JWT_SECRET")
            .map_err(|_| anyhow::anyhow!("AUTH_JWT_SECRET must be set"))?;
        let port = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);

        Ok(Self {
            database_url,
            port,
            jwt_secret,
        })
    }
}
