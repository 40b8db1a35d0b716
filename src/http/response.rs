//! HTTP rendering of rate limit verdicts.

use axum::{
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::warn;

use crate::ratelimit::Denial;

impl IntoResponse for Denial {
    fn into_response(self) -> Response {
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(self.body())).into_response();
        insert_headers(response.headers_mut(), self.headers());
        response
    }
}

/// Insert rate limit headers, replacing any the downstream handler set.
pub(crate) fn insert_headers<I>(map: &mut HeaderMap, headers: I)
where
    I: IntoIterator<Item = (&'static str, String)>,
{
    for (name, value) in headers {
        match HeaderValue::from_str(&value) {
            Ok(value) => {
                map.insert(HeaderName::from_static(name), value);
            }
            Err(e) => warn!(header = name, error = %e, "Dropping invalid header value"),
        }
    }
}
