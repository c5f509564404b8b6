//! SSO handoff endpoints
//!
//! The gateway does not implement SSO itself; both endpoints delegate to an
//! external handler configured through `LLMRELAY_SSO_LOGIN_URL`.

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::utils::error::Result;

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    pub state: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
}

/// GET /auth/login — redirect to the external SSO handler
pub async fn login(query: web::Query<LoginQuery>) -> Result<HttpResponse> {
    let Some(base) = std::env::var("LLMRELAY_SSO_LOGIN_URL").ok() else {
        return Ok(HttpResponse::NotImplemented().json(json!({
            "error": {
                "message": "SSO is not configured on this gateway",
                "type": "not_implemented",
                "code": "501",
            }
        })));
    };

    let location = match &query.state {
        Some(state) => format!("{}?state={}", base, urlencode(state)),
        None => base,
    };

    Ok(HttpResponse::Found()
        .insert_header(("Location", location))
        .finish())
}

/// GET /auth/callback — the external handler owns token exchange
pub async fn callback(query: web::Query<CallbackQuery>) -> Result<HttpResponse> {
    if query.code.is_none() {
        return Ok(HttpResponse::BadRequest().json(json!({
            "error": {
                "message": "Missing authorization code",
                "type": "invalid_request_error",
                "code": "400",
            }
        })));
    }

    Ok(HttpResponse::NotImplemented().json(json!({
        "error": {
            "message": "SSO callback handling is delegated to the external auth service",
            "type": "not_implemented",
            "code": "501",
        }
    })))
}

fn urlencode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
