use crate::authentication::request_principal;
use actix_web::{dev::Payload, FromRequest, HttpRequest};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::future::{ready, Ready};

pub const NAME_CLAIM_TYPE: &str = "name";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    #[serde(rename = "type")]
    pub claim_type: String,
    pub value: String,
}

impl Claim {
    pub fn new(claim_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            claim_type: claim_type.into(),
            value: value.into(),
        }
    }
}

/// A bag of claims plus the scheme that authenticated it.
///
/// An identity without authentication type is anonymous.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimsIdentity {
    authentication_type: Option<String>,
    claims: Vec<Claim>,
}

impl ClaimsIdentity {
    pub fn new(authentication_type: impl Into<String>, claims: Vec<Claim>) -> Self {
        Self {
            authentication_type: Some(authentication_type.into()),
            claims,
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authentication_type(&self) -> Option<&str> {
        self.authentication_type.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authentication_type.is_some()
    }

    pub fn claims(&self) -> &[Claim] {
        &self.claims
    }

    /// Appends without checking for an existing claim of the same type.
    pub fn add_claim(&mut self, claim: Claim) {
        self.claims.push(claim);
    }

    pub fn add_claims(&mut self, claims: impl IntoIterator<Item = Claim>) {
        self.claims.extend(claims);
    }

    pub fn has_claim_type(&self, claim_type: &str) -> bool {
        self.claims.iter().any(|c| c.claim_type == claim_type)
    }

    pub fn find_first_value(&self, claim_type: &str) -> Option<&str> {
        self.claims
            .iter()
            .find(|c| c.claim_type == claim_type)
            .map(|c| c.value.as_str())
    }

    pub fn name(&self) -> Option<&str> {
        self.find_first_value(NAME_CLAIM_TYPE)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimsPrincipal {
    identity: ClaimsIdentity,
}

impl ClaimsPrincipal {
    pub fn new(identity: ClaimsIdentity) -> Self {
        Self { identity }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn identity(&self) -> &ClaimsIdentity {
        &self.identity
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_authenticated()
    }

    pub fn claims(&self) -> &[Claim] {
        self.identity.claims()
    }

    pub fn find_first_value(&self, claim_type: &str) -> Option<&str> {
        self.identity.find_first_value(claim_type)
    }

    pub fn name(&self) -> Option<&str> {
        self.identity.name()
    }
}

/// The principal set by the authentication middleware, anonymous otherwise.
impl FromRequest for ClaimsPrincipal {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(Ok(request_principal(req)))
    }
}

/// Flattens a JWT payload into claims, one claim per array element.
pub fn claims_from_payload(payload: &Map<String, Value>) -> Vec<Claim> {
    let mut claims = Vec::new();
    for (claim_type, value) in payload {
        match value {
            Value::Null => {}
            Value::Array(values) => {
                for value in values {
                    if let Some(value) = claim_value(value) {
                        claims.push(Claim::new(claim_type.as_str(), value));
                    }
                }
            }
            value => {
                if let Some(value) = claim_value(value) {
                    claims.push(Claim::new(claim_type.as_str(), value));
                }
            }
        }
    }
    claims
}

fn claim_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.to_owned()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use actix_web::{test::TestRequest, HttpMessage};
    use serde_json::json;

    #[test]
    fn test_claims_from_payload_flattens_arrays_and_stringifies_scalars() {
        // Arrange
        let payload = json!({
            "sub": "42",
            "role": ["admin", "reader"],
            "email_verified": true,
            "exp": 1700000000,
            "nothing": null
        });

        // Act
        let claims = claims_from_payload(payload.as_object().unwrap());

        // Assert
        assert!(claims.contains(&Claim::new("sub", "42")));
        assert!(claims.contains(&Claim::new("role", "admin")));
        assert!(claims.contains(&Claim::new("role", "reader")));
        assert!(claims.contains(&Claim::new("email_verified", "true")));
        assert!(claims.contains(&Claim::new("exp", "1700000000")));
        assert!(!claims.iter().any(|c| c.claim_type == "nothing"));
    }

    #[test]
    fn test_anonymous_identity_is_not_authenticated() {
        assert!(!ClaimsPrincipal::anonymous().is_authenticated());
        assert!(ClaimsPrincipal::new(ClaimsIdentity::new("Cookies", vec![])).is_authenticated());
    }

    #[test]
    fn test_name_uses_name_claim() {
        // Arrange
        let identity = ClaimsIdentity::new(
            "Cookies",
            vec![Claim::new("sub", "42"), Claim::new("name", "Marcel")],
        );

        // Assert
        assert_eq!(identity.name(), Some("Marcel"));
        assert_eq!(identity.find_first_value("sub"), Some("42"));
    }

    #[actix_web::test]
    async fn test_given_no_principal_extension_when_extract_then_anonymous() {
        // Arrange
        let req = TestRequest::default().to_http_request();

        // Act
        let principal = ClaimsPrincipal::extract(&req).await.unwrap();

        // Assert
        assert!(!principal.is_authenticated());
    }

    #[actix_web::test]
    async fn test_given_principal_extension_when_extract_then_returned() {
        // Arrange
        let req = TestRequest::default().to_http_request();
        let expected = ClaimsPrincipal::new(ClaimsIdentity::new(
            "Bearer",
            vec![Claim::new("sub", "42")],
        ));
        req.extensions_mut().insert(expected.clone());

        // Act
        let principal = ClaimsPrincipal::extract(&req).await.unwrap();

        // Assert
        assert_eq!(principal, expected);
    }
}
