use crate::{
    authentication::AuthenticationScheme,
    cache::{Clock, SystemClock},
    claims::read_unverified_payload,
    config::BffConfig,
    identity::{claims_from_payload, Claim, ClaimsIdentity},
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use oauth2::url::Url;
use oauth2::{
    AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge, PkceCodeVerifier,
    RedirectUrl, Scope,
};
use openidconnect::core::{
    CoreAuthDisplay, CoreAuthenticationFlow, CoreClaimName, CoreClaimType, CoreClient,
    CoreClientAuthMethod, CoreGenderClaim, CoreGrantType, CoreJsonWebKey, CoreJsonWebKeyType,
    CoreJsonWebKeyUse, CoreJweContentEncryptionAlgorithm, CoreJweKeyManagementAlgorithm,
    CoreJwsSigningAlgorithm, CoreResponseMode, CoreResponseType, CoreSubjectIdentifierType,
};
use openidconnect::{
    reqwest::async_http_client, AccessTokenHash, AdditionalProviderMetadata,
    EmptyAdditionalClaims, IssuerUrl, Nonce, OAuth2TokenResponse, ProviderMetadata,
    TokenResponse, UserInfoClaims,
};
use jsonwebtoken::jwk::{Jwk, JwkSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

/// Discovery document is fetched again after this many hours.
pub const DISCOVERY_REFRESH_HOURS: i64 = 12;
/// A forced refresh, e.g. for an unknown signing key, is skipped when the
/// cached document is younger than this.
pub const DISCOVERY_MIN_REFRESH_MINUTES: i64 = 5;

/// Protocol claims of the id token that are not kept on the identity.
const PROTOCOL_CLAIMS: &[&str] = &[
    "nonce", "aud", "azp", "acr", "iss", "iat", "nbf", "exp", "at_hash", "c_hash", "auth_time",
    "ipaddr", "platf", "ver",
];

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct EndSessionProviderMetadata {
    pub end_session_endpoint: Option<String>,
}

impl AdditionalProviderMetadata for EndSessionProviderMetadata {}

pub type BffProviderMetadata = ProviderMetadata<
    EndSessionProviderMetadata,
    CoreAuthDisplay,
    CoreClientAuthMethod,
    CoreClaimName,
    CoreClaimType,
    CoreGrantType,
    CoreJweContentEncryptionAlgorithm,
    CoreJweKeyManagementAlgorithm,
    CoreJwsSigningAlgorithm,
    CoreJsonWebKeyType,
    CoreJsonWebKeyUse,
    CoreJsonWebKey,
    CoreResponseMode,
    CoreResponseType,
    CoreSubjectIdentifierType,
>;

#[derive(thiserror::Error, Debug)]
pub enum OidcError {
    #[error("Invalid OIDC configuration: {0}.")]
    Configuration(String),
    #[error("Discovery failed: {0}.")]
    Discovery(String),
    #[error("Not able to exchange code for token: {0}.")]
    ExchangeCode(String),
    #[error("Server did not return an ID token.")]
    MissingIdToken,
    #[error("ID token verification failed: {0}.")]
    IdTokenVerification(String),
    #[error("Invalid access token.")]
    InvalidAccessTokenHash,
    #[error("Failed when fetching user info: {0}")]
    FetchingUserInfo(String),
    #[error("Issue when getting lock: {0}")]
    Lock(String),
}

pub async fn discover_metadata(authority: &str) -> Result<BffProviderMetadata, OidcError> {
    let issuer = IssuerUrl::new(authority.to_string())
        .map_err(|err| OidcError::Configuration(err.to_string()))?;

    log::debug!("fetching discovery document from {}.", authority);
    BffProviderMetadata::discover_async(issuer, async_http_client)
        .await
        .map_err(|err| OidcError::Discovery(err.to_string()))
}

/// The discovered signing keys, without the keys jsonwebtoken can not use.
pub fn discovered_jwks(metadata: &BffProviderMetadata) -> JwkSet {
    let keys = match serde_json::to_value(metadata.jwks()) {
        Ok(Value::Object(mut jwks)) => match jwks.remove("keys") {
            Some(Value::Array(keys)) => keys,
            _ => Vec::new(),
        },
        Ok(_) => Vec::new(),
        Err(err) => {
            log::warn!("Not able to read discovered jwks: {}", err);
            Vec::new()
        }
    };
    jwks_from_values(keys)
}

pub fn jwks_from_values(keys: Vec<Value>) -> JwkSet {
    let keys = keys
        .into_iter()
        .filter_map(|key| match serde_json::from_value::<Jwk>(key) {
            Ok(jwk) => Some(jwk),
            Err(err) => {
                log::debug!("skipping unsupported jwk: {}", err);
                None
            }
        })
        .collect();
    JwkSet { keys }
}

/// Outcome of a completed authorization code sign-in.
#[derive(Clone, Debug)]
pub struct OidcSignIn {
    pub identity: ClaimsIdentity,
    pub access_token: String,
    pub id_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OidcBffClientTrait: Send + Sync {
    fn authorize_url(&self, challenge: PkceCodeChallenge) -> (Url, CsrfToken, Nonce);

    /// Exchanges the code, verifies the id token and builds the identity from
    /// the id token and user info claims.
    async fn sign_in(
        &self,
        code: String,
        pkce_verifier: String,
        nonce: String,
    ) -> Result<OidcSignIn, OidcError>;
}

pub struct OidcBffClient {
    client: CoreClient,
    scopes: HashSet<Scope>,
}

impl OidcBffClient {
    pub fn from_metadata(
        metadata: BffProviderMetadata,
        config: &BffConfig,
    ) -> Result<Self, OidcError> {
        let redirect_url = RedirectUrl::new(config.redirect_url())
            .map_err(|err| OidcError::Configuration(err.to_string()))?;

        let client = CoreClient::from_provider_metadata(
            metadata,
            ClientId::new(config.client_id.clone()),
            config.client_secret.clone().map(ClientSecret::new),
        )
        .set_redirect_uri(redirect_url);

        Ok(Self {
            client,
            scopes: config.scopes.clone(),
        })
    }

    async fn user_info_claims(&self, access_token: &oauth2::AccessToken) -> Vec<Claim> {
        let request = match self.client.user_info(access_token.to_owned(), None) {
            Ok(request) => request,
            Err(err) => {
                log::debug!("user info endpoint not available: {}", err);
                return Vec::new();
            }
        };

        let user_info: Result<UserInfoClaims<EmptyAdditionalClaims, CoreGenderClaim>, _> =
            request.request_async(async_http_client).await;
        let user_info = match user_info {
            Ok(user_info) => user_info,
            Err(err) => {
                log::warn!("{}", OidcError::FetchingUserInfo(err.to_string()));
                return Vec::new();
            }
        };

        match serde_json::to_value(&user_info) {
            Ok(Value::Object(payload)) => claims_from_payload(&payload),
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl OidcBffClientTrait for OidcBffClient {
    fn authorize_url(&self, challenge: PkceCodeChallenge) -> (Url, CsrfToken, Nonce) {
        self.client
            .authorize_url(
                CoreAuthenticationFlow::AuthorizationCode,
                CsrfToken::new_random,
                Nonce::new_random,
            )
            .add_scopes(self.scopes.clone())
            .set_pkce_challenge(challenge)
            .url()
    }

    async fn sign_in(
        &self,
        code: String,
        pkce_verifier: String,
        nonce: String,
    ) -> Result<OidcSignIn, OidcError> {
        let token_response = self
            .client
            .exchange_code(AuthorizationCode::new(code))
            .set_pkce_verifier(PkceCodeVerifier::new(pkce_verifier))
            .request_async(async_http_client)
            .await
            .map_err(|err| OidcError::ExchangeCode(err.to_string()))?;

        let id_token = {
            let id_token = token_response.id_token().ok_or(OidcError::MissingIdToken)?;
            let claims = id_token
                .claims(&self.client.id_token_verifier(), &Nonce::new(nonce))
                .map_err(|err| OidcError::IdTokenVerification(err.to_string()))?;

            if let Some(expected_access_token_hash) = claims.access_token_hash() {
                let signing_alg = id_token
                    .signing_alg()
                    .map_err(|err| OidcError::IdTokenVerification(err.to_string()))?;
                let actual_access_token_hash =
                    AccessTokenHash::from_token(token_response.access_token(), &signing_alg)
                        .map_err(|err| OidcError::IdTokenVerification(err.to_string()))?;
                if actual_access_token_hash != *expected_access_token_hash {
                    return Err(OidcError::InvalidAccessTokenHash);
                }
            }
            id_token.to_string()
        };
        let payload = read_unverified_payload(&id_token)
            .map_err(|err| OidcError::IdTokenVerification(err.to_string()))?;
        let mut identity = ClaimsIdentity::new(
            AuthenticationScheme::Cookies.as_str(),
            claims_from_payload(&payload)
                .into_iter()
                .filter(|claim| !PROTOCOL_CLAIMS.contains(&claim.claim_type.as_str()))
                .collect(),
        );

        log::debug!("fetching user info.");
        for claim in self.user_info_claims(token_response.access_token()).await {
            if !identity.has_claim_type(&claim.claim_type) {
                identity.add_claim(claim);
            }
        }

        let expires_at = token_response
            .expires_in()
            .and_then(|expires_in| Duration::from_std(expires_in).ok())
            .map(|expires_in| Utc::now() + expires_in);

        Ok(OidcSignIn {
            identity,
            access_token: token_response.access_token().secret().to_owned(),
            id_token,
            refresh_token: token_response
                .refresh_token()
                .map(|token| token.secret().to_owned()),
            expires_at,
        })
    }
}

/// The parts of the discovery document the BFF needs at request time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OidcConfiguration {
    pub issuer: String,
    pub end_session_endpoint: Option<String>,
    pub jwks: JwkSet,
}

impl OidcConfiguration {
    pub fn from_metadata(metadata: &BffProviderMetadata) -> Self {
        Self {
            issuer: metadata.issuer().as_str().to_string(),
            end_session_endpoint: metadata.additional_metadata().end_session_endpoint.clone(),
            jwks: discovered_jwks(metadata),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConfigurationManager: Send + Sync {
    async fn get_configuration(&self) -> Result<OidcConfiguration, OidcError>;

    /// Fetches the document again ahead of its refresh interval, used when a
    /// token is signed with a key that is not in the cached key set.
    async fn refresh_configuration(&self) -> Result<OidcConfiguration, OidcError>;
}

struct CachedConfiguration {
    configuration: OidcConfiguration,
    fetched_at: DateTime<Utc>,
}

/// Serves the discovery document from memory, fetching it again once it is
/// older than the refresh interval. A failed fetch keeps serving the stale
/// document when there is one.
pub struct DiscoveryConfigurationManager {
    authority: String,
    refresh_interval: Duration,
    min_refresh_interval: Duration,
    clock: Arc<dyn Clock>,
    cached: RwLock<Option<CachedConfiguration>>,
}

impl DiscoveryConfigurationManager {
    pub fn new(authority: impl Into<String>) -> Self {
        Self {
            authority: authority.into(),
            refresh_interval: Duration::hours(DISCOVERY_REFRESH_HOURS),
            min_refresh_interval: Duration::minutes(DISCOVERY_MIN_REFRESH_MINUTES),
            clock: Arc::new(SystemClock),
            cached: RwLock::new(None),
        }
    }

    /// Seeds the cache with an already fetched document.
    pub fn with_configuration(mut self, configuration: OidcConfiguration) -> Self {
        let fetched_at = self.clock.now();
        self.cached = RwLock::new(Some(CachedConfiguration {
            configuration,
            fetched_at,
        }));
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn cached_younger_than(
        &self,
        max_age: Duration,
    ) -> Result<Option<OidcConfiguration>, OidcError> {
        let now = self.clock.now();
        let cached = self
            .cached
            .read()
            .map_err(|err| OidcError::Lock(err.to_string()))?;
        Ok(cached
            .as_ref()
            .filter(|cached| now < cached.fetched_at + max_age)
            .map(|cached| cached.configuration.clone()))
    }

    fn fresh_configuration(&self) -> Result<Option<OidcConfiguration>, OidcError> {
        self.cached_younger_than(self.refresh_interval)
    }

    fn stale_configuration(&self) -> Result<Option<OidcConfiguration>, OidcError> {
        let cached = self
            .cached
            .read()
            .map_err(|err| OidcError::Lock(err.to_string()))?;
        Ok(cached.as_ref().map(|cached| cached.configuration.clone()))
    }

    fn store(&self, configuration: OidcConfiguration) -> Result<(), OidcError> {
        let mut cached = self
            .cached
            .write()
            .map_err(|err| OidcError::Lock(err.to_string()))?;
        *cached = Some(CachedConfiguration {
            configuration,
            fetched_at: self.clock.now(),
        });
        Ok(())
    }

    async fn fetch(&self) -> Result<OidcConfiguration, OidcError> {
        match discover_metadata(&self.authority).await {
            Ok(metadata) => {
                let configuration = OidcConfiguration::from_metadata(&metadata);
                self.store(configuration.clone())?;
                log::debug!("discovery document refreshed.");
                Ok(configuration)
            }
            Err(err) => match self.stale_configuration()? {
                Some(configuration) => {
                    log::warn!("{} Serving the cached discovery document.", err);
                    Ok(configuration)
                }
                None => Err(err),
            },
        }
    }
}

#[async_trait]
impl ConfigurationManager for DiscoveryConfigurationManager {
    async fn get_configuration(&self) -> Result<OidcConfiguration, OidcError> {
        match self.fresh_configuration()? {
            Some(configuration) => Ok(configuration),
            None => self.fetch().await,
        }
    }

    async fn refresh_configuration(&self) -> Result<OidcConfiguration, OidcError> {
        match self.cached_younger_than(self.min_refresh_interval)? {
            Some(configuration) => Ok(configuration),
            None => self.fetch().await,
        }
    }
}
