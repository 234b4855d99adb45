use crate::env_var;
use chrono::Duration;
use oauth2::Scope;
use std::collections::HashSet;
use std::env::{self, VarError};
use thiserror::Error;

const SCOPE_OPENID: &str = "openid";
const DEFAULT_CALLBACK_PATH: &str = "/signin-oidc";
const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:5050";
const DEFAULT_SESSION_LIFETIME_MINUTES: i64 = 5;
const MIN_SESSION_LIFETIME_MINUTES: i64 = 1;
const MAX_SESSION_LIFETIME_MINUTES: i64 = 5;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Startup configuration. Built once and shared read-only.
#[derive(Clone, Debug)]
pub struct BffConfig {
    pub authority: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub redirect_domain: String,
    pub callback_path: String,
    pub audience: String,
    pub scopes: HashSet<Scope>,
    pub cors_origins: Vec<String>,
    /// Hex encoded AES-256 key for all cookies. Required in production:
    /// without it every restart or second instance invalidates the sessions.
    pub encryption_key: Option<String>,
    pub session_lifetime: Duration,
    pub bind_address: String,
}

impl BffConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name))
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<String, VarError>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .ok()
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing(name))
        };
        let optional = |name: &'static str| lookup(name).ok().filter(|v| !v.is_empty());

        let callback_path =
            optional(env_var::CALLBACK_PATH).unwrap_or_else(|| DEFAULT_CALLBACK_PATH.to_string());
        if !callback_path.starts_with('/') {
            return Err(ConfigError::Invalid {
                var: env_var::CALLBACK_PATH,
                reason: "must start with '/'".to_string(),
            });
        }

        Ok(Self {
            authority: required(env_var::AUTHORITY)?,
            client_id: required(env_var::CLIENT_ID)?,
            client_secret: optional(env_var::CLIENT_SECRET),
            redirect_domain: required(env_var::REDIRECT_DOMAIN)?
                .trim_end_matches('/')
                .to_string(),
            callback_path,
            audience: required(env_var::AUDIENCE)?,
            scopes: make_scopes_from_env(lookup(env_var::OIDC_SCOPES)),
            cors_origins: split_list(optional(env_var::CORS_ORIGINS)),
            encryption_key: optional(env_var::ENCRYPTION_KEY),
            session_lifetime: session_lifetime(optional(env_var::SESSION_LIFETIME_MINUTES))?,
            bind_address: optional(env_var::BIND_ADDRESS)
                .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string()),
        })
    }

    pub fn redirect_url(&self) -> String {
        format!("{}{}", self.redirect_domain, self.callback_path)
    }
}

fn split_list(value: Option<String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn session_lifetime(value: Option<String>) -> Result<Duration, ConfigError> {
    let minutes = match value {
        Some(v) => v.parse::<i64>().map_err(|err| ConfigError::Invalid {
            var: env_var::SESSION_LIFETIME_MINUTES,
            reason: err.to_string(),
        })?,
        None => DEFAULT_SESSION_LIFETIME_MINUTES,
    };
    Ok(Duration::minutes(minutes.clamp(
        MIN_SESSION_LIFETIME_MINUTES,
        MAX_SESSION_LIFETIME_MINUTES,
    )))
}

pub(crate) fn make_scopes_from_env(env_var_oidc_scopes: Result<String, VarError>) -> HashSet<Scope> {
    let mut scopes: HashSet<Scope> = split_list(env_var_oidc_scopes.ok())
        .into_iter()
        .map(Scope::new)
        .collect();
    scopes.insert(Scope::new(SCOPE_OPENID.to_string()));
    scopes
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use std::collections::HashMap;

    pub(crate) fn test_config() -> BffConfig {
        BffConfig {
            authority: "https://authority".to_string(),
            client_id: "clientId".to_string(),
            client_secret: None,
            redirect_domain: "https://localhost:5050".to_string(),
            callback_path: "/authentication/callback".to_string(),
            audience: "audience".to_string(),
            scopes: make_scopes_from_env(Ok("profile".to_string())),
            cors_origins: vec!["http://localhost:5173".to_string()],
            encryption_key: None,
            session_lifetime: Duration::minutes(5),
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
        }
    }

    fn lookup_from(
        values: &'static [(&'static str, &'static str)],
    ) -> impl Fn(&str) -> Result<String, VarError> {
        let map: HashMap<&str, &str> = values.iter().copied().collect();
        move |name| {
            map.get(name)
                .map(|v| v.to_string())
                .ok_or(VarError::NotPresent)
        }
    }

    const REQUIRED: &[(&str, &str)] = &[
        ("AUTHORITY", "https://authority"),
        ("CLIENT_ID", "clientId"),
        ("REDIRECT_DOMAIN", "https://localhost:5050/"),
        ("AUDIENCE", "audience"),
    ];

    #[test]
    fn test_make_scopes_from_env_with_valid_scopes() {
        // Arrange
        let env_var_oidc_scopes = Ok("profile,email".to_string());

        // Act
        let scopes = make_scopes_from_env(env_var_oidc_scopes);

        // Assert
        let mut expected_scopes: HashSet<Scope> = HashSet::new();
        expected_scopes.insert(Scope::new("profile".to_string()));
        expected_scopes.insert(Scope::new("email".to_string()));
        expected_scopes.insert(Scope::new(SCOPE_OPENID.to_string()));

        assert_eq!(scopes, expected_scopes);
    }

    #[test]
    fn test_make_scopes_from_env_with_missing_env_var() {
        // Act
        let scopes = make_scopes_from_env(Err(VarError::NotPresent));

        // Assert
        let mut expected_scopes: HashSet<Scope> = HashSet::new();
        expected_scopes.insert(Scope::new(SCOPE_OPENID.to_string()));

        assert_eq!(scopes, expected_scopes);
    }

    #[test]
    fn test_given_required_values_when_load_then_defaults_applied() {
        // Act
        let config = BffConfig::from_lookup(lookup_from(REQUIRED)).unwrap();

        // Assert
        assert_eq!(config.authority, "https://authority");
        assert_eq!(config.redirect_domain, "https://localhost:5050");
        assert_eq!(config.callback_path, DEFAULT_CALLBACK_PATH);
        assert_eq!(config.redirect_url(), "https://localhost:5050/signin-oidc");
        assert_eq!(config.session_lifetime, Duration::minutes(5));
        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert!(config.cors_origins.is_empty());
        assert!(config.client_secret.is_none());
    }

    #[test]
    fn test_given_missing_authority_when_load_then_error() {
        // Arrange
        let lookup = lookup_from(&[("CLIENT_ID", "clientId")]);

        // Act
        let result = BffConfig::from_lookup(lookup);

        // Assert
        assert!(matches!(result, Err(ConfigError::Missing(var)) if var == env_var::AUTHORITY));
    }

    #[test]
    fn test_given_lists_and_lifetime_when_load_then_parsed_and_clamped() {
        // Arrange
        let lookup = lookup_from(&[
            ("AUTHORITY", "https://authority"),
            ("CLIENT_ID", "clientId"),
            ("REDIRECT_DOMAIN", "https://localhost:5050"),
            ("AUDIENCE", "audience"),
            ("CORS_ORIGINS", "http://localhost:5173, https://localhost:5001"),
            ("SESSION_LIFETIME_MINUTES", "30"),
            ("CALLBACK_PATH", "/authentication/callback"),
        ]);

        // Act
        let config = BffConfig::from_lookup(lookup).unwrap();

        // Assert
        assert_eq!(
            config.cors_origins,
            vec!["http://localhost:5173", "https://localhost:5001"]
        );
        assert_eq!(config.session_lifetime, Duration::minutes(5));
        assert_eq!(config.callback_path, "/authentication/callback");
    }

    #[test]
    fn test_given_invalid_lifetime_when_load_then_error() {
        // Arrange
        let lookup = lookup_from(&[
            ("AUTHORITY", "https://authority"),
            ("CLIENT_ID", "clientId"),
            ("REDIRECT_DOMAIN", "https://localhost:5050"),
            ("AUDIENCE", "audience"),
            ("SESSION_LIFETIME_MINUTES", "soon"),
        ]);

        // Act
        let result = BffConfig::from_lookup(lookup);

        // Assert
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { var, .. }) if var == env_var::SESSION_LIFETIME_MINUTES
        ));
    }
}
