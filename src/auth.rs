use actix_web::cookie::time::Duration as CookieDuration;
use actix_web::cookie::{Cookie, SameSite};
use actix_web::dev::Payload;
use actix_web::web::Data;
use actix_web::{FromRequest, HttpRequest};
use futures_util::future::{Ready, ready};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::AppError;
use crate::models::{ROLE_ADMIN, ROLE_MANAGER};

/// Idle timeout in seconds before a session expires.
pub const SESSION_TIMEOUT: i64 = 902;

pub const SESSION_COOKIE: &str = "session";

/// Session state carried in the cookie: user id, role, last activity
/// (`iat`) and expiry. Signed with the server key, so the cookie plays
/// the part of the server-side session record.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub role: i64,
    pub iat: i64,
    pub exp: i64,
}

pub fn create_token(secret: &str, user_id: i64, role: i64) -> Result<String, AppError> {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: user_id,
        role,
        iat: now,
        exp: now + SESSION_TIMEOUT,
    };

    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

pub fn validate_token(secret: &str, token: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .ok()
}

pub fn session_cookie(token: String) -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE, token)
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .finish()
}

/// An already-expired cookie, used to log out.
pub fn clear_cookie() -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE, "")
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(CookieDuration::ZERO)
        .finish()
}

/// The logged-in user, extracted from the session cookie. Handlers take
/// this as a parameter; a missing or expired session rejects with 401.
#[derive(Debug, Clone, Copy)]
pub struct SessionUser {
    pub user_id: i64,
    pub role: i64,
}

impl SessionUser {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }

    /// Admins and managers share most management endpoints.
    pub fn can_manage(&self) -> bool {
        self.role <= ROLE_MANAGER
    }
}

fn session_from_request(req: &HttpRequest) -> Result<SessionUser, AppError> {
    let config = req
        .app_data::<Data<Config>>()
        .ok_or(AppError::Unauthorized)?;
    let cookie = req.cookie(SESSION_COOKIE).ok_or(AppError::Unauthorized)?;
    let claims =
        validate_token(&config.session_key, cookie.value()).ok_or(AppError::Unauthorized)?;

    Ok(SessionUser {
        user_id: claims.sub,
        role: claims.role,
    })
}

impl FromRequest for SessionUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(session_from_request(req))
    }
}
