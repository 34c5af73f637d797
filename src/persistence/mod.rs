//! Persistence layer modules.

pub mod inbox_repo;
pub mod session_repo;
pub mod store;

pub use store::DocumentStore;
