//! crm-axum: axum adapter for the tenant-scoped CRM services.
//!
//! Every route requires a bearer token; the verified principal is handed to
//! [`crm_core::CrmApp`] and errors are rendered as `{name, message, code, className, errors?}`.

pub mod app;
pub mod params;
pub mod rest;
pub mod state;
mod error;
pub use error::CrmAxumError;
pub use state::CrmAxumState;

pub use app::{axum, AxumApp};
