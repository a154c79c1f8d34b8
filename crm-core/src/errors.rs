//! # Errors
//!
//! Structured, Feathers-style errors for the CRM backend.
//! - consistent status codes + class names
//! - can be carried through `anyhow::Error` (service pipeline)
//! - transport-agnostic (the HTTP adapter decides how to serialize)
//!
//! Policy code returns `Result<T, CrmError>` directly; the service layer
//! moves them through `anyhow` and the adapter downcasts them back.

use std::fmt;

use anyhow::Error as AnyError;
use serde_json::{json, Value};

/// A convenience result type for service-level APIs.
pub type CrmResult<T> = std::result::Result<T, AnyError>;

/// Result type for the pure policy layer.
pub type PolicyResult<T> = std::result::Result<T, CrmError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BadRequest,               // 400
    NotAuthenticated,         // 401
    Forbidden,                // 403
    NotFound,                 // 404
    MethodNotAllowed,         // 405
    Conflict,                 // 409
    PolicyInvariantViolation, // 500, internal only
    GeneralError,             // 500
}

impl ErrorKind {
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::BadRequest => 400,
            ErrorKind::NotAuthenticated => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::MethodNotAllowed => 405,
            ErrorKind::Conflict => 409,
            ErrorKind::PolicyInvariantViolation => 500,
            ErrorKind::GeneralError => 500,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "BadRequest",
            ErrorKind::NotAuthenticated => "NotAuthenticated",
            ErrorKind::Forbidden => "Forbidden",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::MethodNotAllowed => "MethodNotAllowed",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::PolicyInvariantViolation => "PolicyInvariantViolation",
            ErrorKind::GeneralError => "GeneralError",
        }
    }

    pub fn class_name(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "bad-request",
            ErrorKind::NotAuthenticated => "not-authenticated",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not-found",
            ErrorKind::MethodNotAllowed => "method-not-allowed",
            ErrorKind::Conflict => "conflict",
            ErrorKind::PolicyInvariantViolation => "policy-invariant-violation",
            ErrorKind::GeneralError => "general-error",
        }
    }

    /// Kinds the caller caused and can recover from.
    pub fn is_client_error(&self) -> bool {
        self.status_code() < 500
    }
}

/// A structured CRM error that can live inside `anyhow::Error`.
#[derive(Debug)]
pub struct CrmError {
    pub kind: ErrorKind,
    pub message: String,
    pub errors: Option<Value>,
    pub source: Option<AnyError>,
}

impl CrmError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            errors: None,
            source: None,
        }
    }

    pub fn with_errors(mut self, errors: Value) -> Self {
        self.errors = Some(errors);
        self
    }

    pub fn with_source(mut self, source: AnyError) -> Self {
        self.source = Some(source);
        self
    }

    pub fn code(&self) -> u16 {
        self.kind.status_code()
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn class_name(&self) -> &'static str {
        self.kind.class_name()
    }

    /// Convert into `anyhow::Error` so it flows through the service layer.
    pub fn into_anyhow(self) -> AnyError {
        AnyError::new(self)
    }

    /// Find a `CrmError` anywhere in an `anyhow` chain.
    pub fn from_anyhow(err: &AnyError) -> Option<&CrmError> {
        err.chain().find_map(|e| e.downcast_ref::<CrmError>())
    }

    /// Turn any error into a CrmError:
    /// - if it's already a CrmError, keep it
    /// - otherwise wrap as GeneralError
    pub fn normalize(err: AnyError) -> CrmError {
        match err.downcast::<CrmError>() {
            Ok(crm) => crm,
            Err(other) => CrmError::new(ErrorKind::GeneralError, other.to_string()).with_source(other),
        }
    }

    /// A version safe to return to clients. Sources are dropped and the
    /// message of an invariant violation never leaves the process.
    pub fn sanitize_for_client(&self) -> CrmError {
        match self.kind {
            ErrorKind::PolicyInvariantViolation => {
                CrmError::new(ErrorKind::GeneralError, "Internal server error")
            }
            kind => CrmError {
                kind,
                message: self.message.clone(),
                errors: self.errors.clone(),
                source: None,
            },
        }
    }

    pub fn to_json(&self) -> Value {
        let mut base = json!({
            "name": self.name(),
            "message": self.message,
            "code": self.code(),
            "className": self.class_name(),
        });

        if let Some(e) = &self.errors {
            base["errors"] = e.clone();
        }
        base
    }

    // ---- Constructors ----

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, msg)
    }

    /// A `BadRequest` that names the offending field.
    pub fn validation(field: &str, msg: impl Into<String>) -> Self {
        let msg = msg.into();
        Self::new(ErrorKind::BadRequest, format!("Invalid value for '{field}': {msg}"))
            .with_errors(json!({ field: [msg] }))
    }

    pub fn not_authenticated(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotAuthenticated, msg)
    }
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, msg)
    }
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }
    pub fn method_not_allowed(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::MethodNotAllowed, msg)
    }
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, msg)
    }
    pub fn invariant_violation(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::PolicyInvariantViolation, msg)
    }
    pub fn general_error(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::GeneralError, msg)
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

impl fmt::Display for CrmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.name(), self.code(), self.message)
    }
}

impl std::error::Error for CrmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Kind of the `CrmError` inside an `anyhow` error, if any.
pub fn kind_of(err: &AnyError) -> Option<ErrorKind> {
    CrmError::from_anyhow(err).map(|e| e.kind)
}

/// Convenience helper for "bail with CrmError".
#[macro_export]
macro_rules! bail_crm {
    ($ctor:ident, $msg:expr) => {
        return Err($crate::errors::CrmError::$ctor($msg).into_anyhow());
    };
    ($ctor:ident, $fmt:expr, $($arg:tt)*) => {
        return Err($crate::errors::CrmError::$ctor(format!($fmt, $($arg)*)).into_anyhow());
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_names_the_field() {
        let err = CrmError::validation("status", "unknown value 'BOGUS'");
        assert_eq!(err.code(), 400);
        assert_eq!(err.to_json()["errors"]["status"][0], "unknown value 'BOGUS'");
    }

    #[test]
    fn invariant_violation_is_hidden_from_clients() {
        let err = CrmError::invariant_violation("lead L1 owner belongs to org-999");
        let safe = err.sanitize_for_client();
        assert_eq!(safe.kind, ErrorKind::GeneralError);
        assert_eq!(safe.message, "Internal server error");
        assert!(!safe.to_json().to_string().contains("org-999"));
    }

    #[test]
    fn survives_a_round_trip_through_anyhow_context() {
        let err = CrmError::forbidden("nope").into_anyhow().context("while patching");
        assert_eq!(kind_of(&err), Some(ErrorKind::Forbidden));
    }
}
