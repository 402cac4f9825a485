//! # parley-auth
//!
//! HS256 bearer tokens. [`JwtValidator`] implements the relay's
//! [`AuthValidator`](parley_core::collab::AuthValidator) contract and can
//! also mint tokens for tests and operator tooling.

#![deny(unsafe_code)]

pub mod errors;
pub mod jwt;

pub use errors::TokenError;
pub use jwt::{Claims, JwtValidator};
