#![forbid(unsafe_code)]

pub mod artifacts;
pub mod bank;
pub mod repository;
pub mod sqlite;

pub use repository::{Storage, StorageError};
