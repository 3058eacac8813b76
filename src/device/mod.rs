//! Device lookup and high-activity trigger on the Particle relay.

use crate::credentials::Credential;
use crate::error::{LocateError, TransportError};
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

pub const PARTICLE_BASE_URL: &str = "https://api.particle.io/v1";

/// A device registered on the relay account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Device {
    pub id: String,
    pub name: String,
}

/// Wire form of a device listing entry (`name` may be null).
#[derive(Deserialize)]
struct DeviceRecord {
    id: String,
    #[serde(default)]
    name: Option<String>,
}

impl From<DeviceRecord> for Device {
    fn from(record: DeviceRecord) -> Self {
        Self {
            id: record.id,
            name: record.name.unwrap_or_default(),
        }
    }
}

/// Which device of the account listing to monitor.
///
/// # Known limitation
/// Only single-device deployments are supported: the exporter monitors the
/// device at `index` (0 by default) in the order the relay returns them.
/// Accounts with several controllers should set the index explicitly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceSelection {
    pub index: usize,
}

impl DeviceSelection {
    pub fn select(&self, devices: Vec<Device>) -> Result<Device, LocateError> {
        let available = devices.len();
        devices
            .into_iter()
            .nth(self.index)
            .ok_or(LocateError::NoDevice {
                index: self.index,
                available,
            })
    }
}

/// HTTP client for the device endpoints of the relay API.
pub struct DeviceLocator {
    http_client: Client,
    base_url: String,
}

impl DeviceLocator {
    pub fn new(http_client: Client, base_url: impl Into<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.into(),
        }
    }

    /// Lists the devices of the credential's account, in relay order.
    pub async fn list_devices(&self, credential: &Credential) -> Result<Vec<Device>, TransportError> {
        let url = format!("{}/devices", self.base_url);
        let response = self
            .http_client
            .get(&url)
            .header(ACCEPT, "application/json")
            .bearer_auth(&credential.bearer_token)
            .send()
            .await?;

        check_response_status(&response)?;
        let records: Vec<DeviceRecord> = response
            .json()
            .await
            .map_err(|e| TransportError::MalformedBody(e.to_string()))?;
        Ok(records.into_iter().map(Device::from).collect())
    }

    /// Lists devices and applies `selection`.
    pub async fn locate(
        &self,
        credential: &Credential,
        selection: DeviceSelection,
    ) -> Result<Device, LocateError> {
        let devices = self.list_devices(credential).await?;
        debug!(count = devices.len(), "Listed devices");

        let device = selection.select(devices)?;
        info!(device_id = %device.id, device_name = %device.name, "Monitoring device");
        Ok(device)
    }

    /// Asks the device to report more often for `window` (sent as whole seconds).
    ///
    /// Best-effort: callers log and ignore failures, which only lower the
    /// reporting cadence.
    pub async fn start_high_activity_mode(
        &self,
        credential: &Credential,
        device_id: &str,
        window: Duration,
    ) -> Result<(), TransportError> {
        let url = format!("{}/devices/{}/highActivity", self.base_url, device_id);
        let seconds = window.as_secs().to_string();

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&credential.bearer_token)
            .form(&[("args", seconds.as_str())])
            .send()
            .await?;

        check_response_status(&response)?;
        debug!(device_id = %device_id, window_secs = window.as_secs(), "High-activity mode started");
        Ok(())
    }
}

/// Map non-2xx statuses to transport errors.
///
/// - 401 → `Unauthorized` (token expired or revoked)
/// - Other non-2xx → `Status(code)`
pub(crate) fn check_response_status(response: &reqwest::Response) -> Result<(), TransportError> {
    match response.status() {
        StatusCode::UNAUTHORIZED => Err(TransportError::Unauthorized),
        s if !s.is_success() => Err(TransportError::Status(s.as_u16())),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use mockito::{Matcher, Server};

    fn credential() -> Credential {
        Credential::new("particle_token", Utc::now() + Duration::hours(1))
    }

    fn device(id: &str) -> Device {
        Device {
            id: id.to_string(),
            name: format!("{}-name", id),
        }
    }

    #[tokio::test]
    async fn test_list_devices() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/devices")
            .match_header("authorization", "Bearer particle_token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[
                    {"id": "dev1", "name": "conical", "connected": true},
                    {"id": "dev2", "name": null}
                ]"#,
            )
            .create_async()
            .await;

        let locator = DeviceLocator::new(Client::new(), server.url());
        let devices = locator.list_devices(&credential()).await.unwrap();

        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].id, "dev1");
        assert_eq!(devices[0].name, "conical");
        assert_eq!(devices[1].name, "");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_list_devices_unauthorized() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/devices")
            .with_status(401)
            .with_body(r#"{"error":"invalid_token"}"#)
            .create_async()
            .await;

        let locator = DeviceLocator::new(Client::new(), server.url());
        let err = locator.list_devices(&credential()).await.unwrap_err();
        assert_eq!(err, TransportError::Unauthorized);
    }

    #[tokio::test]
    async fn test_list_devices_malformed_body() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/devices")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"devices": "not a list"}"#)
            .create_async()
            .await;

        let locator = DeviceLocator::new(Client::new(), server.url());
        let err = locator.list_devices(&credential()).await.unwrap_err();
        assert!(matches!(err, TransportError::MalformedBody(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_locate_picks_first_device() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/devices")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"id":"dev1","name":"a"},{"id":"dev2","name":"b"}]"#)
            .create_async()
            .await;

        let locator = DeviceLocator::new(Client::new(), server.url());
        let dev = locator
            .locate(&credential(), DeviceSelection::default())
            .await
            .unwrap();
        assert_eq!(dev.id, "dev1");
    }

    #[tokio::test]
    async fn test_locate_empty_account() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/devices")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("[]")
            .create_async()
            .await;

        let locator = DeviceLocator::new(Client::new(), server.url());
        let err = locator
            .locate(&credential(), DeviceSelection::default())
            .await
            .unwrap_err();
        assert_eq!(err, LocateError::NoDevice { index: 0, available: 0 });
    }

    #[test]
    fn test_selection_by_index() {
        let devices = vec![device("dev1"), device("dev2")];
        let picked = DeviceSelection { index: 1 }.select(devices.clone()).unwrap();
        assert_eq!(picked.id, "dev2");

        let err = DeviceSelection { index: 2 }.select(devices).unwrap_err();
        assert_eq!(err, LocateError::NoDevice { index: 2, available: 2 });
    }

    #[tokio::test]
    async fn test_start_high_activity_mode() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/devices/dev1/highActivity")
            .match_header("authorization", "Bearer particle_token")
            .match_body(Matcher::UrlEncoded("args".into(), "120".into()))
            .with_status(200)
            .with_body(r#"{"return_value":1}"#)
            .create_async()
            .await;

        let locator = DeviceLocator::new(Client::new(), server.url());
        locator
            .start_high_activity_mode(&credential(), "dev1", std::time::Duration::from_secs(120))
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_start_high_activity_mode_failure() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/devices/dev1/highActivity")
            .with_status(404)
            .create_async()
            .await;

        let locator = DeviceLocator::new(Client::new(), server.url());
        let err = locator
            .start_high_activity_mode(&credential(), "dev1", std::time::Duration::from_secs(120))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Status(404));
    }
}
