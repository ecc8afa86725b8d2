//! Device snapshot attached to outgoing logs.

use crate::error::ChannelError;
use serde::{Deserialize, Serialize};

/// Immutable description of the host device and application, captured
/// once and shared by reference across logs until the channel's cache is
/// invalidated.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct DeviceSnapshot {
    #[serde(rename = "sdkName")]
    pub sdk_name: String,
    #[serde(rename = "sdkVersion")]
    pub sdk_version: String,
    #[serde(rename = "osName")]
    pub os_name: String,
    #[serde(rename = "osVersion", skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(rename = "oemName", skip_serializing_if = "Option::is_none")]
    pub oem_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(rename = "timeZoneOffset")]
    pub time_zone_offset: i32,
    #[serde(rename = "appVersion", skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    #[serde(rename = "appBuild", skip_serializing_if = "Option::is_none")]
    pub app_build: Option<String>,
}

/// Source of [`DeviceSnapshot`] values.
///
/// The host application supplies an implementation wired to its platform
/// APIs; [`HostDeviceInfo`] is a minimal fallback for non-mobile hosts and
/// tests. Building a snapshot may fail (missing platform services), in
/// which case the log being enriched is dropped with a warning.
pub trait DeviceInfoProvider: Send + Sync {
    fn device_info(&self) -> Result<DeviceSnapshot, ChannelError>;
}

/// Default provider describing the current process's host.
#[derive(Clone, Debug, Default)]
pub struct HostDeviceInfo {
    pub app_version: Option<String>,
    pub app_build: Option<String>,
}

impl DeviceInfoProvider for HostDeviceInfo {
    fn device_info(&self) -> Result<DeviceSnapshot, ChannelError> {
        Ok(DeviceSnapshot {
            sdk_name: "logship.rust".to_string(),
            sdk_version: env!("CARGO_PKG_VERSION").to_string(),
            os_name: std::env::consts::OS.to_string(),
            os_version: None,
            model: Some(std::env::consts::ARCH.to_string()),
            oem_name: None,
            locale: std::env::var("LANG").ok(),
            time_zone_offset: 0,
            app_version: self.app_version.clone(),
            app_build: self.app_build.clone(),
        })
    }
}
