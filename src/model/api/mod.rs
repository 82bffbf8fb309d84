//! API-compatible types.
//!
//! The types in this module are serialised in an API-friendly way, e.g.:
//!
//! - Field names are camelCase.
//! - Session tokens are serialised as URL-safe base64 strings.

pub mod admin;
pub mod auth;
pub mod voter;
