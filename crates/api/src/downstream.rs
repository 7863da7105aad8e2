use axum::{
    extract::Request,
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use tracing::debug;

use clubhub_auth::principal_from_headers;
use clubhub_auth::trust::{USER_EMAIL_HEADER, USER_ID_HEADER, USER_ROLES_HEADER};

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Rebuild the caller from trust headers set by the gateway.
///
/// Never rejects: a request without the e-mail header continues
/// unauthenticated and the route decides (see `CurrentPrincipal`).
pub async fn trust_filter(mut req: Request, next: Next) -> Response {
    let headers = req.headers();
    let principal = principal_from_headers(
        header(headers, USER_EMAIL_HEADER),
        header(headers, USER_ID_HEADER),
        header(headers, USER_ROLES_HEADER),
    );

    match principal {
        Some(p) => {
            debug!(email = %p.email, roles = p.authorities.len(), "request principal");
            req.extensions_mut().insert(p);
        }
        None => debug!("unauthenticated request"),
    }

    next.run(req).await
}
