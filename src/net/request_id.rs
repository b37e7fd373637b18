use axum::http::Request;
use tower_http::request_id::{MakeRequestId, RequestId};
use ulid::Ulid;

/// Generates a fresh ULID per request for the `x-request-id` header.
#[derive(Clone, Copy, Default)]
pub struct MakeRequestUlid;

impl MakeRequestId for MakeRequestUlid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let request_ulid = Ulid::new().to_string().parse().ok()?;
        Some(RequestId::new(request_ulid))
    }
}
