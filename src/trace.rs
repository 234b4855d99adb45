use crate::{authentication::request_principal, user::UserModel};
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::Error;
use futures_util::future::LocalBoxFuture;
use std::future::{ready, Ready};

/// Logs the caller, the request line and the response status at info level.
#[derive(Default)]
pub struct TraceRequests;

impl TraceRequests {
    pub fn new() -> Self {
        Self
    }
}

impl<S, B> Transform<S, ServiceRequest> for TraceRequests
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = TraceRequestsMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(TraceRequestsMiddleware { service }))
    }
}

pub struct TraceRequestsMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for TraceRequestsMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        if log::log_enabled!(log::Level::Info) {
            let user = UserModel::new(&request_principal(req.request()), req.request());
            match serde_json::to_string_pretty(&user) {
                Ok(user) => log::info!("User: {}", user),
                Err(err) => log::warn!("Not able to serialize user: {}", err),
            }
            match req.query_string() {
                "" => log::info!("Request: {} {}", req.method(), req.path()),
                query => log::info!("Request: {} {}?{}", req.method(), req.path(), query),
            }
        }

        let fut = self.service.call(req);
        Box::pin(async move {
            let res = fut.await?;
            log::info!("Response: {}", res.status());
            Ok(res)
        })
    }
}
