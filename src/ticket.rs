use crate::identity::ClaimsPrincipal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const ACCESS_TOKEN: &str = "access_token";
pub const ID_TOKEN: &str = "id_token";
pub const REFRESH_TOKEN: &str = "refresh_token";
pub const EXPIRES_AT: &str = "expires_at";

const TOKEN_KEY_PREFIX: &str = ".Token.";
const TOKEN_NAMES_KEY: &str = ".TokenNames";

/// State attached to an authentication, including saved tokens.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthenticationProperties {
    items: BTreeMap<String, String>,
    issued_utc: Option<DateTime<Utc>>,
    expires_utc: Option<DateTime<Utc>>,
}

impl AuthenticationProperties {
    pub fn issued_utc(&self) -> Option<DateTime<Utc>> {
        self.issued_utc
    }

    pub fn set_issued_utc(&mut self, issued: DateTime<Utc>) {
        self.issued_utc = Some(issued);
    }

    pub fn expires_utc(&self) -> Option<DateTime<Utc>> {
        self.expires_utc
    }

    pub fn set_expires_utc(&mut self, expires: DateTime<Utc>) {
        self.expires_utc = Some(expires);
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_utc.is_some_and(|expires| expires <= now)
    }

    pub fn item(&self, key: &str) -> Option<&str> {
        self.items.get(key).map(String::as_str)
    }

    /// Replaces any previously stored tokens.
    pub fn store_tokens<I, K, V>(&mut self, tokens: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        if let Some(names) = self.items.remove(TOKEN_NAMES_KEY) {
            for name in names.split(';') {
                self.items.remove(&format!("{TOKEN_KEY_PREFIX}{name}"));
            }
        }

        let mut names = Vec::new();
        for (name, value) in tokens {
            let name = name.into();
            self.items
                .insert(format!("{TOKEN_KEY_PREFIX}{name}"), value.into());
            names.push(name);
        }
        if !names.is_empty() {
            self.items.insert(TOKEN_NAMES_KEY.to_string(), names.join(";"));
        }
    }

    pub fn get_token_value(&self, name: &str) -> Option<&str> {
        self.item(&format!("{TOKEN_KEY_PREFIX}{name}"))
    }
}

/// Authentication state persisted server side for a cookie session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuthenticationTicket {
    pub principal: ClaimsPrincipal,
    pub properties: AuthenticationProperties,
    pub scheme: String,
}

impl AuthenticationTicket {
    pub fn new(
        principal: ClaimsPrincipal,
        properties: AuthenticationProperties,
        scheme: impl Into<String>,
    ) -> Self {
        Self {
            principal,
            properties,
            scheme: scheme.into(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
