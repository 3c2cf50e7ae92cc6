//! Registered devices.
//!
//! Devices are registered by the devices themselves, so there is no create.

use entra_admin_core::client::DirectoryClient;
use entra_admin_core::error::DirectoryResult;
use entra_admin_core::models::{EntityFamily, PropertyMap};
use entra_admin_core::pagination::EntityStream;

use crate::entity::{self, ListOptions};
use crate::models::Device;

const FAMILY: EntityFamily = EntityFamily::Device;

#[tracing::instrument(name = "entra::devices::list", skip(client, options))]
pub fn list(client: &DirectoryClient, options: ListOptions) -> EntityStream<Device> {
    entity::list(client, FAMILY, options)
}

#[tracing::instrument(name = "entra::devices::get", skip(client), fields(device_id = %device_id))]
pub async fn get(client: &DirectoryClient, device_id: &str) -> DirectoryResult<Device> {
    entity::get(client, FAMILY, device_id).await
}

/// Update `displayName`, `accountEnabled` or `extensionAttributes`.
#[tracing::instrument(name = "entra::devices::update", skip(client, properties), fields(device_id = %device_id))]
pub async fn update(client: &DirectoryClient, device_id: &str, properties: &PropertyMap) -> DirectoryResult<()> {
    entity::update(client, FAMILY, device_id, properties).await.map(|_| ())
}

/// Allow the device to authenticate. Returns `false` if it already could.
///
/// # Tracing
///
/// Emits a span named `entra::devices::enable` with field `device_id`.
#[tracing::instrument(name = "entra::devices::enable", skip(client), fields(device_id = %device_id))]
pub async fn enable(client: &DirectoryClient, device_id: &str) -> DirectoryResult<bool> {
    entity::set_account_enabled(client, FAMILY, device_id, true).await
}

/// Block the device from authenticating. Returns `false` if it already was.
///
/// # Tracing
///
/// Emits a span named `entra::devices::disable` with field `device_id`.
#[tracing::instrument(name = "entra::devices::disable", skip(client), fields(device_id = %device_id))]
pub async fn disable(client: &DirectoryClient, device_id: &str) -> DirectoryResult<bool> {
    entity::set_account_enabled(client, FAMILY, device_id, false).await
}

#[tracing::instrument(name = "entra::devices::delete", skip(client), fields(device_id = %device_id))]
pub async fn delete(client: &DirectoryClient, device_id: &str) -> DirectoryResult<()> {
    entity::delete(client, FAMILY, device_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{odata_page, setup_mock_client};
    use entra_admin_core::pagination;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn disable_patches_enabled_device() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server).await;

        Mock::given(method("GET"))
            .and(path("/devices/d-1"))
            .and(query_param("$select", "id,accountEnabled"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "d-1", "accountEnabled": true})))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/devices/d-1"))
            .and(body_json(json!({"accountEnabled": false})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        assert!(disable(&client, "d-1").await.unwrap());
    }

    #[tokio::test]
    async fn list_applies_filter() {
        let server = MockServer::start().await;
        let client = setup_mock_client(&server).await;

        Mock::given(method("GET"))
            .and(path("/devices"))
            .and(query_param("$filter", "operatingSystem eq 'Windows'"))
            .respond_with(ResponseTemplate::new(200).set_body_json(odata_page(
                vec![json!({"id": "d-1", "operatingSystem": "Windows", "accountEnabled": true})],
                None,
            )))
            .expect(1)
            .mount(&server)
            .await;

        let devices = pagination::collect_all(list(
            &client,
            ListOptions::new().filter("operatingSystem eq 'Windows'"),
        ))
        .await
        .unwrap();
        assert_eq!(devices.len(), 1);
        assert!(devices[0].is_enabled());
    }
}
