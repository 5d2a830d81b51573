pub mod backend;
pub mod error;
