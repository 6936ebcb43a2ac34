//! Per-request IDs and tracing spans for Rocket.
//!
//! Attach [`RequestIdFairing`] to a Rocket instance and every request gets an
//! `X-Request-Id` (taken from the incoming header when present) and an
//! `info`-level span which handlers can pick up through [`TracingSpan`].
use std::fmt;

use rocket::{
    Data, Response,
    fairing::{Fairing, Info, Kind},
    http::Status,
    request::{self, FromRequest, Request},
};
use sentry::configure_scope;
use tracing::{Span, info};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// A type that represents a request's ID.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestId(pub String);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl RequestId {
    fn of(request: &Request<'_>) -> RequestId {
        request
            .local_cache(|| {
                RequestId(
                    request
                        .headers()
                        .get_one(REQUEST_ID_HEADER)
                        .filter(|id| !id.is_empty())
                        .map(ToString::to_string)
                        .unwrap_or_else(|| Uuid::new_v4().to_string()),
                )
            })
            .clone()
    }
}

/// Returns the current request's ID, assigning one only as necessary.
#[rocket::async_trait]
impl<'r> FromRequest<'r> for RequestId {
    type Error = ();

    async fn from_request(
        request: &'r Request<'_>,
    ) -> request::Outcome<Self, Self::Error> {
        request::Outcome::Success(RequestId::of(request))
    }
}

/// The span opened for the current request by [`RequestIdFairing`].
pub struct TracingSpan<T = Span>(pub T);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for TracingSpan {
    type Error = ();

    async fn from_request(
        request: &'r Request<'_>,
    ) -> request::Outcome<Self, ()> {
        match request.local_cache(|| TracingSpan::<Option<Span>>(None)) {
            TracingSpan(Some(span)) => {
                request::Outcome::Success(TracingSpan(span.to_owned()))
            }
            TracingSpan(None) => {
                request::Outcome::Error((Status::InternalServerError, ()))
            }
        }
    }
}

pub struct RequestIdFairing;

#[rocket::async_trait]
impl Fairing for RequestIdFairing {
    fn info(&self) -> Info {
        Info {
            name: "Request ID fairing",
            kind: Kind::Request | Kind::Response,
        }
    }

    async fn on_request(&self, req: &mut Request<'_>, _data: &mut Data<'_>) {
        let request_id = RequestId::of(req);
        let user_agent = req.headers().get_one("User-Agent").unwrap_or("");

        let span = tracing::info_span!(
            "request",
            otel.name = %format!("{} {}", req.method(), req.uri().path()),
            http.method = %req.method(),
            http.uri = %req.uri().path(),
            http.user_agent = %user_agent,
            http.status_code = tracing::field::Empty,
            http.request_id = %request_id
        );
        span.in_scope(|| {
            info!("received request");
            configure_scope(|scope| {
                scope.set_tag("request_id", &request_id);
            });
        });
        req.local_cache(|| TracingSpan::<Option<Span>>(Some(span)));
    }

    async fn on_response<'r>(
        &self,
        req: &'r Request<'_>,
        res: &mut Response<'r>,
    ) {
        let request_id = RequestId::of(req);

        if let Some(span) = req
            .local_cache(|| TracingSpan::<Option<Span>>(None))
            .0
            .to_owned()
        {
            span.record("http.status_code", res.status().code);
            span.in_scope(|| {
                info!("returning request {} with {}", request_id, res.status());
            });
        }

        res.set_raw_header(REQUEST_ID_HEADER, request_id.0);
    }
}
