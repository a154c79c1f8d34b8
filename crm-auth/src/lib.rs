//! crm-auth: bearer JWT authentication producing a verified [`crm_core::Principal`].

pub mod core;
pub mod jwt;
pub mod options;

pub use crate::core::{extract_bearer_token, AuthError, Authenticator};
pub use jwt::{Audience, Claims, JwtAuthenticator};
pub use options::{JwtAlgorithm, JwtOptions};
