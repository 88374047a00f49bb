//! Per-request caller information derived from the headers the hosting platform injects.

mod authentication;
mod security;

pub use authentication::AuthenticatedUser;
pub use security::UserSecurityContext;
