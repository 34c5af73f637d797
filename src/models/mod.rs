//! Domain model module declarations.

pub mod document;
pub mod message;
pub mod session;
