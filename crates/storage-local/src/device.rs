//! Per-installation device identity.

use log::info;
use std::fmt;
use uuid::Uuid;

use crate::errors::Result;
use crate::kv::{ContextId, KvStore};

pub const DEVICE_ID_KEY: &str = "device-id";

/// Random id generated on first use and reused for the life of the installation.
/// Attributes writes fanned out to the cloud.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    pub fn load_or_create(store: &dyn KvStore, origin: ContextId) -> Result<Self> {
        if let Some(existing) = store
            .get(DEVICE_ID_KEY)?
            .filter(|value| !value.trim().is_empty())
        {
            return Ok(Self(existing));
        }

        let id = Uuid::new_v4().to_string();
        store.set(origin, DEVICE_ID_KEY, &id)?;
        info!("[LocalStorage] Generated device id {}", id);
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
