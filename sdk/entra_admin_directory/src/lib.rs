#![doc = include_str!("../README.md")]

pub mod applications;
pub mod bulk;
pub mod devices;
mod entity;
pub mod groups;
pub mod models;
pub mod operation;
pub mod service_principals;
pub mod users;

pub use entity::ListOptions;

/// Test utilities shared across modules.
#[cfg(test)]
pub(crate) mod test_utils {
    pub use entra_admin_core::test_support::{
        odata_error, odata_page, setup_mock_client, test_group, test_user,
    };
}
