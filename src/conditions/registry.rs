//! Per-device table of active conditions.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::conditions::{DeviceStateControl, Profile, ProfileType, StateControlFactory};
use crate::{AppError, Result};

/// Condition currently active on a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveCondition {
    /// Enabled condition type.
    pub profile_type: ProfileType,
    /// Enabled profile.
    pub profile: Profile,
}

struct ActiveEntry {
    control: Arc<dyn DeviceStateControl>,
    condition: ActiveCondition,
}

type Slot = Arc<Mutex<Option<ActiveEntry>>>;

/// Tracks which control instance enabled the condition on each device.
///
/// Calls for one device are serialized; different devices proceed
/// independently.
pub struct ConditionRegistry {
    factory: Arc<dyn StateControlFactory>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl std::fmt::Debug for ConditionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionRegistry").finish_non_exhaustive()
    }
}

impl ConditionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(factory: Arc<dyn StateControlFactory>) -> Self {
        Self {
            factory,
            slots: Mutex::new(HashMap::new()),
        }
    }

    async fn slot(&self, device: &str) -> Slot {
        let mut slots = self.slots.lock().await;
        Arc::clone(slots.entry(device.to_owned()).or_default())
    }

    /// Drop the device's slot once it is empty and nobody else holds it.
    ///
    /// Clones are only handed out under the map lock, so a count of two
    /// (the map and `slot`) means no caller is waiting on it.
    async fn release(&self, device: &str, slot: Slot) {
        let mut slots = self.slots.lock().await;
        let idle = Arc::strong_count(&slot) == 2
            && slot.try_lock().is_ok_and(|active| active.is_none());
        if idle && slots.get(device).is_some_and(|s| Arc::ptr_eq(s, &slot)) {
            slots.remove(device);
        }
    }

    /// Enable `profile_id` of condition type `type_id` on `device`.
    ///
    /// # Errors
    ///
    /// - [`AppError::ConditionActive`] if a condition is already active.
    /// - [`AppError::NotFound`] if the type or profile is not offered.
    /// - Any failure creating the control or enabling the condition.
    pub async fn enable(
        &self,
        device: &str,
        type_id: &str,
        profile_id: &str,
    ) -> Result<ActiveCondition> {
        let slot = self.slot(device).await;
        let result = self.enable_in(&slot, device, type_id, profile_id).await;
        self.release(device, slot).await;
        result
    }

    async fn enable_in(
        &self,
        slot: &Slot,
        device: &str,
        type_id: &str,
        profile_id: &str,
    ) -> Result<ActiveCondition> {
        let mut active = slot.lock().await;
        if let Some(entry) = active.as_ref() {
            return Err(AppError::ConditionActive(format!(
                "{device} already runs {}/{}",
                entry.condition.profile_type.identifier, entry.condition.profile.identifier
            )));
        }

        let control = self.factory.create(device).await?;
        match enable_with(control.as_ref(), type_id, profile_id).await {
            Ok(condition) => {
                info!(
                    device,
                    condition = type_id,
                    profile = profile_id,
                    "device condition enabled"
                );
                *active = Some(ActiveEntry {
                    control,
                    condition: condition.clone(),
                });
                Ok(condition)
            }
            Err(err) => {
                if let Err(close_err) = control.close().await {
                    warn!(device, error = %close_err, "failed to release state control");
                }
                Err(err)
            }
        }
    }

    /// Disable the active condition on `device` through the instance that
    /// enabled it.
    ///
    /// # Errors
    ///
    /// - [`AppError::NotFound`] if no condition is active.
    /// - The device's failure to disable; the condition stays recorded.
    pub async fn disable(&self, device: &str) -> Result<ActiveCondition> {
        let slot = self.slot(device).await;
        let result = disable_in(&slot, device).await;
        self.release(device, slot).await;
        result
    }

    /// Condition currently active on `device`.
    pub async fn active(&self, device: &str) -> Option<ActiveCondition> {
        let slot = self.slots.lock().await.get(device).cloned()?;
        let active = slot.lock().await;
        active.as_ref().map(|e| e.condition.clone())
    }

    /// Devices the registry currently tracks, sorted.
    pub async fn devices(&self) -> Vec<String> {
        let mut devices: Vec<String> = self.slots.lock().await.keys().cloned().collect();
        devices.sort();
        devices
    }
}

async fn disable_in(slot: &Slot, device: &str) -> Result<ActiveCondition> {
    let mut active = slot.lock().await;
    let Some(entry) = active.take() else {
        return Err(AppError::NotFound(format!(
            "no active condition on {device}"
        )));
    };

    if let Err(err) = entry.control.disable(&entry.condition.profile_type).await {
        *active = Some(entry);
        return Err(err);
    }
    if let Err(err) = entry.control.close().await {
        warn!(device, error = %err, "failed to release state control");
    }
    info!(
        device,
        condition = entry.condition.profile_type.identifier.as_str(),
        "device condition disabled"
    );
    Ok(entry.condition)
}

async fn enable_with(
    control: &dyn DeviceStateControl,
    type_id: &str,
    profile_id: &str,
) -> Result<ActiveCondition> {
    let types = control.list().await?;
    let profile_type = types
        .into_iter()
        .find(|t| t.identifier == type_id)
        .ok_or_else(|| AppError::NotFound(format!("condition type {type_id}")))?;
    let profile = profile_type
        .profile(profile_id)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("profile {profile_id} of {type_id}")))?;

    control.enable(&profile_type, &profile).await?;
    Ok(ActiveCondition {
        profile_type,
        profile,
    })
}
