//! Device conditions (thermal state, network link quality, …).
//!
//! A condition is enabled and later disabled through the *same*
//! [`DeviceStateControl`] instance; [`registry::ConditionRegistry`] keeps
//! that instance per device between the two calls.

pub mod inducer;
pub mod registry;

use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::Serialize;

use crate::Result;

/// One selectable setting of a condition type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Profile {
    /// Profile identifier.
    pub identifier: String,
    /// Human-readable description.
    pub description: String,
}

/// A kind of condition the device can induce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileType {
    /// Type identifier.
    pub identifier: String,
    /// Display name.
    pub name: String,
    /// Whether this type is currently active on the device.
    pub is_active: bool,
    /// Available profiles.
    pub profiles: Vec<Profile>,
}

impl ProfileType {
    /// Profile named `identifier`, if offered.
    #[must_use]
    pub fn profile(&self, identifier: &str) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.identifier == identifier)
    }
}

/// Device-side condition control.
pub trait DeviceStateControl: Send + Sync {
    /// Condition types the device offers.
    ///
    /// # Errors
    ///
    /// Propagates the invocation failure.
    fn list(&self) -> BoxFuture<'_, Result<Vec<ProfileType>>>;

    /// Activate `profile` of `profile_type`.
    ///
    /// # Errors
    ///
    /// Propagates the invocation failure or the device's refusal.
    fn enable<'a>(
        &'a self,
        profile_type: &'a ProfileType,
        profile: &'a Profile,
    ) -> BoxFuture<'a, Result<()>>;

    /// Deactivate the condition this instance enabled.
    ///
    /// # Errors
    ///
    /// Propagates the invocation failure or the device's refusal.
    fn disable<'a>(&'a self, profile_type: &'a ProfileType) -> BoxFuture<'a, Result<()>>;

    /// Release the instance's resources.
    ///
    /// # Errors
    ///
    /// Propagates the close failure.
    fn close(&self) -> BoxFuture<'_, Result<()>>;
}

/// Creates a [`DeviceStateControl`] for a device.
pub trait StateControlFactory: Send + Sync {
    /// New control instance for `device`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::ConnectionSetupFailed`](crate::AppError::ConnectionSetupFailed)
    /// if the device service cannot be reached.
    fn create<'a>(&'a self, device: &'a str) -> BoxFuture<'a, Result<Arc<dyn DeviceStateControl>>>;
}
