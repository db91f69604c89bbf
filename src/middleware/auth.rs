use axum::{
    extract::{Request, State},
    http::{
        header::{AUTHORIZATION, COOKIE},
        HeaderMap,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::entities::user;
use crate::error::ApiError;
use crate::identity::{ensure_user, IdentityUser};
use crate::state::AppState;

pub const ACCESS_TOKEN_COOKIE: &str = "access_token";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    User,
    Admin,
}

#[derive(Clone)]
pub struct AuthState {
    pub state: AppState,
    pub role: Role,
}

/// The authenticated caller, inserted into request extensions for handlers.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub user: user::Model,
    pub identity: IdentityUser,
}

pub async fn auth_middleware(
    State(auth): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Response {
    let token = extract_token(req.headers()).map(str::to_owned);

    match authenticate(&auth, token).await {
        Ok(context) => {
            req.extensions_mut().insert(context);
            next.run(req).await
        }
        Err(err) => err.into_response(),
    }
}

async fn authenticate(auth: &AuthState, token: Option<String>) -> Result<AuthContext, ApiError> {
    let token =
        token.ok_or_else(|| ApiError::Unauthenticated("Missing access token".to_owned()))?;

    let identity = auth.state.identity.get_user(&token).await?;

    if auth.role == Role::Admin && !auth.state.config.is_admin_email(&identity.email) {
        return Err(ApiError::Forbidden("Admin access required".to_owned()));
    }

    let user = ensure_user(auth.state.db.as_ref(), &identity, None).await?;
    Ok(AuthContext { user, identity })
}

/// Bearer header first, then the `access_token` cookie.
pub fn extract_token(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());

    bearer.or_else(|| {
        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|header| header.to_str().ok())
            .flat_map(|header| header.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == ACCESS_TOKEN_COOKIE)
            .map(|(_, value)| value)
            .filter(|token| !token.is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request(header: (&str, &str)) -> Request {
        Request::builder()
            .header(header.0, header.1)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn bearer_header_wins() {
        let req = Request::builder()
            .header("Authorization", "Bearer abc")
            .header("Cookie", "access_token=def")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_token(req.headers()), Some("abc"));
    }

    #[test]
    fn falls_back_to_cookie() {
        let req = request(("Cookie", "theme=dark; access_token=def"));
        assert_eq!(extract_token(req.headers()), Some("def"));
    }

    #[test]
    fn missing_token() {
        let req = request(("Authorization", "Basic xyz"));
        assert_eq!(extract_token(req.headers()), None);
    }
}
