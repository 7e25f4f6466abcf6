//! Edge check for `/app*` and `/admin*`: validate or refresh the session, enforce the admin
//! role, and carry cookie rewrites onto whatever response goes out.

use axum::extract::{Request, State};
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect as HttpRedirect, Response};
use cardiosense_core::{AuthCookies, CookieUpdate, GuardDecision, Redirect};

use crate::app::AppState;

pub(crate) async fn edge_auth(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let jar = cookie_jar(request.headers());
    let secure = state.sessions.secure_cookies();

    match state.sessions.authorize_path(&path, &jar).await {
        GuardDecision::Redirect(redirect) => {
            tracing::info!(target: "cardiosense::edge", %path, location = %redirect.location, "redirecting");
            redirect_response(&redirect, secure)
        }
        GuardDecision::Allow { session, cookies } => {
            if let Some(session) = session {
                request.extensions_mut().insert(session);
            }
            let mut response = next.run(request).await;
            if let Some(cookies) = cookies {
                append_cookies(response.headers_mut(), &cookies, secure);
            }
            response
        }
    }
}

pub(crate) fn cookie_jar(headers: &HeaderMap) -> AuthCookies {
    AuthCookies::from_cookie_headers(headers.get_all(COOKIE).iter().filter_map(|v| v.to_str().ok()))
}

pub(crate) fn append_cookies(headers: &mut HeaderMap, cookies: &CookieUpdate, secure: bool) {
    for value in cookies.header_values(secure) {
        match HeaderValue::from_str(&value) {
            Ok(v) => {
                headers.append(SET_COOKIE, v);
            }
            Err(e) => tracing::warn!(target: "cardiosense::edge", error = %e, "unencodable cookie dropped"),
        }
    }
}

/// 307 with `Location` and any cookie change.
pub(crate) fn redirect_response(redirect: &Redirect, secure: bool) -> Response {
    let mut response = HttpRedirect::temporary(&redirect.location).into_response();
    if let Some(cookies) = &redirect.cookies {
        append_cookies(response.headers_mut(), cookies, secure);
    }
    response
}
