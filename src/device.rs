//! Installed application lookup.

use std::collections::HashMap;

use futures_util::future::BoxFuture;

use crate::{AppError, Result};

/// Where an application is installed on the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledBundle {
    /// Path of the `.app` bundle.
    pub path: String,
    /// Path of the application's data container.
    pub container: String,
}

/// Resolves bundle identifiers to install locations.
pub trait BundleLocator: Send + Sync {
    /// Locate the installed application `bundle_id`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if the application is not installed.
    fn locate<'a>(&'a self, bundle_id: &'a str) -> BoxFuture<'a, Result<InstalledBundle>>;
}

/// [`BundleLocator`] over a fixed table, e.g. from an earlier app listing.
#[derive(Debug, Clone, Default)]
pub struct StaticBundleLocator {
    bundles: HashMap<String, InstalledBundle>,
}

impl StaticBundleLocator {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the location of `bundle_id`.
    #[must_use]
    pub fn with_bundle(
        mut self,
        bundle_id: impl Into<String>,
        path: impl Into<String>,
        container: impl Into<String>,
    ) -> Self {
        self.bundles.insert(
            bundle_id.into(),
            InstalledBundle {
                path: path.into(),
                container: container.into(),
            },
        );
        self
    }
}

impl BundleLocator for StaticBundleLocator {
    fn locate<'a>(&'a self, bundle_id: &'a str) -> BoxFuture<'a, Result<InstalledBundle>> {
        Box::pin(async move {
            self.bundles
                .get(bundle_id)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("app {bundle_id} is not installed")))
        })
    }
}
