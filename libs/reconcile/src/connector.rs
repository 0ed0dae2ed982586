//! Provider connector boundary and a mock implementation.
//!
//! The connector abstracts the four read-side operations the reconciliation
//! task needs from a cloud vendor:
//! - Health-check an image template
//! - Bulk-fetch the observed instances for a set of images
//! - Health-check a single instance
//! - Check the outcome of a start operation
//!
//! Each vendor supplies one implementation. A mock is provided for testing
//! and development.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use vmfleet_model::{CloudError, CloudImage, CloudInstance, ObservedInstance};

/// The provider's report for a cycle: image id → observed instance name →
/// observed attributes.
pub type ObservedWorld = HashMap<String, HashMap<String, ObservedInstance>>;

/// Read-side capability of a cloud vendor, consumed by the reconciliation
/// task.
#[async_trait]
pub trait CloudConnector: Send + Sync {
    /// Health-checks an image template. Empty means healthy.
    async fn check_image(&self, image: &CloudImage) -> Result<Vec<CloudError>>;

    /// Fetches the observed instances for all given images in one call.
    ///
    /// Images with no observed instances may be absent from the result.
    async fn fetch_instances(&self, images: &[Arc<CloudImage>]) -> Result<ObservedWorld>;

    /// Health-checks a single instance. Empty means healthy.
    async fn check_instance(&self, instance: &CloudInstance) -> Result<Vec<CloudError>>;

    /// Checks the outcome of an instance's start operation.
    ///
    /// Only called when an instance that was expected to be visible never
    /// appeared in the observed world.
    async fn check_start_operation(&self, instance: &CloudInstance) -> Result<Vec<CloudError>>;
}

/// Mock connector for testing and development.
///
/// The observed world and the error sets returned by each probe are
/// scriptable; everything defaults to healthy and empty.
#[derive(Default)]
pub struct MockConnector {
    observed: RwLock<ObservedWorld>,
    image_errors: RwLock<HashMap<String, Vec<CloudError>>>,
    instance_errors: RwLock<HashMap<String, Vec<CloudError>>>,
    start_errors: RwLock<HashMap<String, Vec<CloudError>>>,
    fetch_calls: AtomicUsize,
    start_checks: AtomicUsize,
    fail_probes: bool,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mock whose probes all fail with a connector error.
    pub fn failing() -> Self {
        Self {
            fail_probes: true,
            ..Self::default()
        }
    }

    /// Scripts one observed instance for an image.
    pub fn observe(&self, image_id: &str, name: &str, observed: ObservedInstance) {
        self.observed
            .write()
            .expect("observed world lock poisoned")
            .entry(image_id.to_string())
            .or_default()
            .insert(name.to_string(), observed);
    }

    /// Removes a previously scripted observation.
    pub fn forget(&self, image_id: &str, name: &str) {
        if let Some(instances) = self
            .observed
            .write()
            .expect("observed world lock poisoned")
            .get_mut(image_id)
        {
            instances.remove(name);
        }
    }

    /// Scripts the image health probe result.
    pub fn set_image_errors(&self, image_id: &str, errors: Vec<CloudError>) {
        self.image_errors
            .write()
            .expect("image errors lock poisoned")
            .insert(image_id.to_string(), errors);
    }

    /// Scripts the per-instance health probe result.
    pub fn set_instance_errors(&self, instance_id: &str, errors: Vec<CloudError>) {
        self.instance_errors
            .write()
            .expect("instance errors lock poisoned")
            .insert(instance_id.to_string(), errors);
    }

    /// Scripts the start-operation probe result.
    pub fn set_start_errors(&self, instance_id: &str, errors: Vec<CloudError>) {
        self.start_errors
            .write()
            .expect("start errors lock poisoned")
            .insert(instance_id.to_string(), errors);
    }

    /// Number of bulk fetches issued so far.
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Number of start-operation checks issued so far.
    pub fn start_checks(&self) -> usize {
        self.start_checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CloudConnector for MockConnector {
    async fn check_image(&self, image: &CloudImage) -> Result<Vec<CloudError>> {
        if self.fail_probes {
            anyhow::bail!("mock connector configured to fail");
        }
        debug!(image_id = %image.id(), "[MOCK] Checking image");
        Ok(self
            .image_errors
            .read()
            .expect("image errors lock poisoned")
            .get(image.id())
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_instances(&self, images: &[Arc<CloudImage>]) -> Result<ObservedWorld> {
        if self.fail_probes {
            anyhow::bail!("mock connector configured to fail");
        }
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);

        let observed = self.observed.read().expect("observed world lock poisoned");
        let world = images
            .iter()
            .filter_map(|image| {
                observed
                    .get(image.id())
                    .map(|instances| (image.id().to_string(), instances.clone()))
            })
            .collect();
        Ok(world)
    }

    async fn check_instance(&self, instance: &CloudInstance) -> Result<Vec<CloudError>> {
        if self.fail_probes {
            anyhow::bail!("mock connector configured to fail");
        }
        Ok(self
            .instance_errors
            .read()
            .expect("instance errors lock poisoned")
            .get(instance.instance_id())
            .cloned()
            .unwrap_or_default())
    }

    async fn check_start_operation(&self, instance: &CloudInstance) -> Result<Vec<CloudError>> {
        if self.fail_probes {
            anyhow::bail!("mock connector configured to fail");
        }
        self.start_checks.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .start_errors
            .read()
            .expect("start errors lock poisoned")
            .get(instance.instance_id())
            .cloned()
            .unwrap_or_default())
    }
}
