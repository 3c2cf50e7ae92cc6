#![doc = include_str!("../README.md")]

pub mod audit_logs;
pub mod auth_methods;
pub mod conditional_access;
pub mod models;
pub mod operation;
pub mod sign_ins;
