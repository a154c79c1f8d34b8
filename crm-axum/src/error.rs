use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use crm_auth::AuthError;
use crm_core::errors::{CrmError, ErrorKind};

#[derive(Debug)]
pub struct CrmAxumError(pub anyhow::Error);

impl From<anyhow::Error> for CrmAxumError {
    fn from(e: anyhow::Error) -> Self {
        Self(e)
    }
}

impl From<CrmError> for CrmAxumError {
    fn from(e: CrmError) -> Self {
        Self(e.into_anyhow())
    }
}

impl From<AuthError> for CrmAxumError {
    fn from(e: AuthError) -> Self {
        CrmError::from(e).into()
    }
}

impl IntoResponse for CrmAxumError {
    fn into_response(self) -> Response {
        // Anything that is not a CrmError is an internal failure; its text stays in the log.
        let crm = match CrmError::from_anyhow(&self.0) {
            Some(crm) => crm,
            None => {
                tracing::error!(error = ?self.0, "unhandled error");
                return respond(&CrmError::general_error("Internal server error"));
            }
        };

        if !crm.kind.is_client_error() {
            tracing::error!(kind = crm.name(), error = ?self.0, "request failed");
        }
        respond(&crm.sanitize_for_client())
    }
}

fn respond(err: &CrmError) -> Response {
    let status = StatusCode::from_u16(err.code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut res = (status, Json(err.to_json())).into_response();
    if err.kind == ErrorKind::NotAuthenticated {
        res.headers_mut()
            .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    }
    res
}
