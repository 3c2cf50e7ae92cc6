#![doc = include_str!("../README.md")]

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod pagination;
pub mod password;
pub mod validation;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use client::DirectoryClient;
pub use error::{DirectoryError, DirectoryResult, ErrorKind};
