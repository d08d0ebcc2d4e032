//! Devices, device profiles and the in-memory device registry

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::alarm::AlarmRule;
use crate::error::{EngineError, EngineResult};
use crate::telemetry::{DataType, TelemetryEntry};

/// Expected key and kind of one telemetry field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryDefinition {
    pub key: String,
    pub data_type: DataType,
    #[serde(default)]
    pub unit: Option<String>,
}

impl TelemetryDefinition {
    pub fn new(key: impl Into<String>, data_type: DataType) -> Self {
        Self {
            key: key.into(),
            data_type,
            unit: None,
        }
    }

    /// Whether an entry of kind `actual` satisfies this definition.
    ///
    /// A LONG is accepted where DOUBLE is declared, since integral doubles
    /// arrive as longs.
    pub fn accepts(&self, actual: DataType) -> bool {
        actual == self.data_type || (self.data_type == DataType::Double && actual == DataType::Long)
    }
}

/// Shared, read-mostly configuration for a class of devices
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub strict_mode: bool,
    #[serde(default)]
    pub telemetry_definitions: Vec<TelemetryDefinition>,
    #[serde(default)]
    pub alarm_rules: Vec<AlarmRule>,
    #[serde(default)]
    pub default_rule_chain_id: Option<String>,
    #[serde(default)]
    pub default_queue_name: Option<String>,
}

impl DeviceProfile {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn definition(&self, key: &str) -> Option<&TelemetryDefinition> {
        self.telemetry_definitions.iter().find(|d| d.key == key)
    }

    /// Telemetry definition keys must be unique
    pub fn validate(&self) -> EngineResult<()> {
        let mut seen = HashSet::new();
        for definition in &self.telemetry_definitions {
            if !seen.insert(definition.key.as_str()) {
                return Err(EngineError::InvalidProfile(format!(
                    "profile '{}' declares telemetry key '{}' twice",
                    self.id, definition.key
                )));
            }
        }
        Ok(())
    }

    /// Apply strict mode: keep only declared keys with a matching kind.
    ///
    /// Profiles without strict mode pass everything through.
    pub fn filter_strict(&self, device_id: &str, entries: Vec<TelemetryEntry>) -> Vec<TelemetryEntry> {
        if !self.strict_mode {
            return entries;
        }

        entries
            .into_iter()
            .filter(|entry| match self.definition(entry.key()) {
                Some(definition) if definition.accepts(entry.data_type()) => true,
                Some(definition) => {
                    warn!(
                        "device {device_id}: dropping '{}', expected {} but got {}",
                        entry.key(),
                        definition.data_type,
                        entry.data_type()
                    );
                    false
                }
                None => {
                    warn!("device {device_id}: dropping undeclared key '{}'", entry.key());
                    false
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    /// Free-form device type, published as `deviceType` metadata
    #[serde(default)]
    pub device_type: Option<String>,
    pub access_token: String,
    #[serde(default)]
    pub profile_id: Option<String>,
    #[serde(default)]
    pub created_time: i64,
}

impl Device {
    pub fn new(id: impl Into<String>, name: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            device_type: None,
            access_token: access_token.into(),
            profile_id: None,
            created_time: crate::util::now_millis(),
        }
    }

    pub fn with_profile(mut self, profile_id: impl Into<String>) -> Self {
        self.profile_id = Some(profile_id.into());
        self
    }

    pub fn with_type(mut self, device_type: impl Into<String>) -> Self {
        self.device_type = Some(device_type.into());
        self
    }
}

#[derive(Default)]
struct RegistryInner {
    devices: HashMap<String, Device>,
    tokens: HashMap<String, String>,
    profiles: HashMap<String, Arc<DeviceProfile>>,
}

/// Lookup of devices by id and access token, and of their profiles
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a profile
    pub async fn register_profile(&self, profile: DeviceProfile) -> EngineResult<()> {
        profile.validate()?;
        debug!("registering device profile {}", profile.id);
        self.inner
            .write()
            .await
            .profiles
            .insert(profile.id.clone(), Arc::new(profile));
        Ok(())
    }

    /// Insert or replace a device; its access token is re-indexed
    pub async fn register_device(&self, device: Device) {
        debug!("registering device {} ({})", device.id, device.name);
        let mut inner = self.inner.write().await;
        if let Some(previous) = inner.devices.get(&device.id) {
            let token = previous.access_token.clone();
            inner.tokens.remove(&token);
        }
        inner
            .tokens
            .insert(device.access_token.clone(), device.id.clone());
        inner.devices.insert(device.id.clone(), device);
    }

    pub async fn remove_device(&self, device_id: &str) -> Option<Device> {
        let mut inner = self.inner.write().await;
        let device = inner.devices.remove(device_id)?;
        inner.tokens.remove(&device.access_token);
        Some(device)
    }

    pub async fn device(&self, device_id: &str) -> Option<Device> {
        self.inner.read().await.devices.get(device_id).cloned()
    }

    pub async fn profile(&self, profile_id: &str) -> Option<Arc<DeviceProfile>> {
        self.inner.read().await.profiles.get(profile_id).cloned()
    }

    /// The profile a device is bound to, if any
    pub async fn profile_for_device(&self, device_id: &str) -> Option<Arc<DeviceProfile>> {
        let inner = self.inner.read().await;
        let profile_id = inner.devices.get(device_id)?.profile_id.as_ref()?;
        inner.profiles.get(profile_id).cloned()
    }

    pub async fn find_by_token(&self, access_token: &str) -> Option<Device> {
        let inner = self.inner.read().await;
        let device_id = inner.tokens.get(access_token)?;
        inner.devices.get(device_id).cloned()
    }

    pub async fn devices(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.inner.read().await.devices.values().cloned().collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }
}
