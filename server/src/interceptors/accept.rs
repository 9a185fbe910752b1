use axum::{
    extract::Request,
    http::{header::ACCEPT, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

/// An axum middleware function.
///
/// Rejects requests whose `Accept` header rules out a JSON response.
pub async fn require_json(req: Request, next: Next) -> Response {
    if !accepts_json(req.headers()) {
        return StatusCode::NOT_ACCEPTABLE.into_response();
    }
    next.run(req).await
}

/// Whether any media range in the `Accept` header(s) matches `application/json`.
///
/// Clients must ask for JSON explicitly: no `Accept` header at all is not enough.
pub fn accepts_json(headers: &HeaderMap) -> bool {
    headers
        .get_all(ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(media_range_matches_json)
}

fn media_range_matches_json(range: &str) -> bool {
    // drop parameters such as q=0.9
    let media_type = range.split(';').next().unwrap_or_default().trim();
    match media_type.split_once('/') {
        Some(("*", _)) => true,
        Some((kind, subtype)) => {
            kind.eq_ignore_ascii_case("application")
                && (subtype == "*" || subtype.eq_ignore_ascii_case("json"))
        }
        None => false,
    }
}
