use crate::{authentication::request_principal, identity::ClaimsPrincipal};
use actix_web::{dev::Payload, FromRequest, HttpRequest};
use serde::{Deserialize, Serialize};
use std::future::{ready, Ready};

/// Profile of the current caller built from its claims.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserModel {
    pub operation: String,
    pub app_id: Option<String>,
    pub id: Option<String>,
    pub name: Option<String>,
    pub family_name: Option<String>,
    pub given_name: Option<String>,
    pub email: Option<String>,
    pub ip: Option<String>,
}

impl UserModel {
    pub fn new(principal: &ClaimsPrincipal, req: &HttpRequest) -> Self {
        let claim = |claim_type: &str| principal.find_first_value(claim_type).map(str::to_string);
        Self {
            operation: operation(req),
            app_id: claim("client_id"),
            id: claim("sub"),
            name: claim("name"),
            family_name: claim("family_name"),
            given_name: claim("given_name"),
            email: claim("email"),
            ip: req.peer_addr().map(|addr| addr.ip().to_string()),
        }
    }
}

/// `HTTP: {method} {route pattern}`, the raw path when no route matched.
fn operation(req: &HttpRequest) -> String {
    let route = req
        .match_pattern()
        .unwrap_or_else(|| req.path().to_string());
    format!("HTTP: {} {}", req.method(), route)
}

impl FromRequest for UserModel {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(Ok(UserModel::new(&request_principal(req), req)))
    }
}
