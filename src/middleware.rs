use actix_web::body::EitherBody;
use actix_web::http::header::{HeaderValue, SET_COOKIE};
use actix_web::web::Data;
use actix_web::{
    Error, ResponseError,
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
};
use futures_util::future::{LocalBoxFuture, Ready, ready};
use std::rc::Rc;

use crate::auth::{SESSION_COOKIE, create_token, session_cookie, validate_token};
use crate::config::Config;
use crate::error::AppError;

/// Guards the authenticated scopes: requests without a valid session
/// cookie are rejected with 401, and every request that passes re-issues
/// the cookie so the idle-timeout window rolls forward.
pub struct Authorization;

impl<S, B> Transform<S, ServiceRequest> for Authorization
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = AuthorizationMW<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthorizationMW {
            service: Rc::new(service),
        }))
    }
}

pub struct AuthorizationMW<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for AuthorizationMW<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &self,
        ctx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let secret = match req.app_data::<Data<Config>>() {
            Some(config) => config.session_key.clone(),
            None => {
                let res = AppError::Unauthorized.error_response().map_into_right_body();
                return Box::pin(async move { Ok(req.into_response(res)) });
            }
        };

        let claims = req
            .cookie(SESSION_COOKIE)
            .and_then(|cookie| validate_token(&secret, cookie.value()));

        let Some(claims) = claims else {
            let res = AppError::Unauthorized.error_response().map_into_right_body();
            return Box::pin(async move { Ok(req.into_response(res)) });
        };

        let fut = self.service.call(req);
        Box::pin(async move {
            let mut res = fut.await?.map_into_left_body();
            if let Ok(token) = create_token(&secret, claims.sub, claims.role) {
                if let Ok(value) = HeaderValue::from_str(&session_cookie(token).to_string()) {
                    res.headers_mut().append(SET_COOKIE, value);
                }
            }
            Ok(res)
        })
    }
}
