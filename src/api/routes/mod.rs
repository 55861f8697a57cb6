//! API route modules.

pub mod chat;
pub mod invite;
pub mod session;
