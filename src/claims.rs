use crate::identity::{claims_from_payload, ClaimsIdentity};
use jsonwebtoken::{DecodingKey, Validation};
use serde_json::{Map, Value};

const ISSUER_CLAIM: &str = "iss";

/// Reads the payload of a compact JWT without checking its signature.
///
/// Only for tokens that were already validated by another party, e.g. tokens
/// received from the token endpoint over TLS.
pub(crate) fn read_unverified_payload(
    token: &str,
) -> Result<Map<String, Value>, jsonwebtoken::errors::Error> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    jsonwebtoken::decode::<Map<String, Value>>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
}

/// Appends every claim of `access_token` to `identity` when the token was
/// issued by `expected_issuer`.
///
/// Absent, malformed and foreign tokens leave the identity untouched.
/// Claims already on the identity are kept and may be duplicated.
pub fn augment_from_access_token(
    access_token: Option<&str>,
    expected_issuer: &str,
    identity: &mut ClaimsIdentity,
) {
    let Some(token) = access_token.filter(|t| !t.is_empty()) else {
        return;
    };

    let payload = match read_unverified_payload(token) {
        Ok(payload) => payload,
        Err(err) => {
            log::debug!("access token is not a readable jwt, skipping claims: {}", err);
            return;
        }
    };

    let issuer = payload.get(ISSUER_CLAIM).and_then(Value::as_str);
    if issuer != Some(expected_issuer) {
        log::debug!("access token issuer {:?} does not match, skipping claims.", issuer);
        return;
    }

    identity.add_claims(claims_from_payload(&payload));
}
