// Principal extraction for HTTP handlers

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::AppError;
use crate::models::UserId;

pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated caller, taken from the `x-user-id` header.
///
/// Authentication itself happens upstream; requests without the header are
/// rejected with `401`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    pub user_id: UserId,
}

impl Viewer {
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }

    fn from_parts(parts: &Parts) -> Result<Self, AppError> {
        let value = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| AppError::Unauthorized(format!("missing {} header", USER_ID_HEADER)))?;
        let user_id = value
            .to_str()
            .map_err(|_| AppError::Unauthorized(format!("{} is not valid text", USER_ID_HEADER)))?
            .trim();
        if user_id.is_empty() {
            return Err(AppError::Unauthorized(format!("empty {} header", USER_ID_HEADER)));
        }
        Ok(Self::new(user_id))
    }
}

impl<S> FromRequestParts<S> for Viewer
where
    S: Send + Sync,
{
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let viewer = Self::from_parts(parts);
        async move { viewer }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(header: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = header {
            builder = builder.header(USER_ID_HEADER, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn test_viewer_from_header() {
        let mut parts = parts(Some(" alice "));
        let viewer = Viewer::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(viewer, Viewer::new("alice"));
    }

    #[tokio::test]
    async fn test_missing_header_is_unauthorized() {
        let mut parts = parts(None);
        let err = Viewer::from_request_parts(&mut parts, &()).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));

        let mut parts = self::parts(Some(""));
        assert!(Viewer::from_request_parts(&mut parts, &()).await.is_err());
    }
}
