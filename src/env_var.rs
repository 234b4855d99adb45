pub(crate) const AUTHORITY: &str = "AUTHORITY";
pub(crate) const CLIENT_ID: &str = "CLIENT_ID";
pub(crate) const CLIENT_SECRET: &str = "CLIENT_SECRET";
pub(crate) const REDIRECT_DOMAIN: &str = "REDIRECT_DOMAIN";
pub(crate) const CALLBACK_PATH: &str = "CALLBACK_PATH";
pub(crate) const AUDIENCE: &str = "AUDIENCE";

/// Comma seperated list of scopes.
pub(crate) const OIDC_SCOPES: &str = "OIDC_SCOPES";

/// Comma seperated list of allowed origins.
pub(crate) const CORS_ORIGINS: &str = "CORS_ORIGINS";

/// Hex encoded 32 byte key, required in production.
pub(crate) const ENCRYPTION_KEY: &str = "ENCRYPTION_KEY";

pub(crate) const SESSION_LIFETIME_MINUTES: &str = "SESSION_LIFETIME_MINUTES";

pub(crate) const BIND_ADDRESS: &str = "BIND_ADDRESS";
