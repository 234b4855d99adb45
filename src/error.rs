use actix_web::{http::StatusCode, HttpResponse};
use serde::Serialize;

pub const PROBLEM_JSON: &str = "application/problem+json";

/// RFC 7807 problem body returned by the api on failures.
#[derive(Debug, Serialize, PartialEq)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub problem_type: String,
    pub title: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ProblemDetails {
    pub fn new(status: StatusCode, detail: Option<String>) -> Self {
        let (problem_type, title) = match status {
            StatusCode::BAD_REQUEST => (
                "https://tools.ietf.org/html/rfc9110#section-15.5.1",
                "Bad Request",
            ),
            StatusCode::UNAUTHORIZED => (
                "https://tools.ietf.org/html/rfc9110#section-15.5.2",
                "Unauthorized",
            ),
            StatusCode::NOT_FOUND => (
                "https://tools.ietf.org/html/rfc9110#section-15.5.5",
                "Not Found",
            ),
            _ => (
                "https://tools.ietf.org/html/rfc9110#section-15.6.1",
                "An error occurred while processing your request.",
            ),
        };
        Self {
            problem_type: problem_type.to_string(),
            title: title.to_string(),
            status: status.as_u16(),
            detail,
        }
    }

    pub fn response(status: StatusCode, detail: impl Into<String>) -> HttpResponse {
        HttpResponse::build(status)
            .content_type(PROBLEM_JSON)
            .json(Self::new(status, Some(detail.into())))
    }
}
