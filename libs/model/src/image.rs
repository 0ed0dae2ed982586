//! An image template and its registry of tracked instances.
//!
//! The instance map is the principal shared mutable resource of the system:
//! the reconciliation task writes it while other threads read it. A single
//! lock around an ordinary map gives the required contract (atomic
//! put/remove, snapshot enumeration) without striping; guards are scoped to
//! the map operation and never cross an await point.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::errors::{CloudError, ErrorState};
use crate::instance::{CloudInstance, ObservedInstance};

/// An image template owning the set of instances started from it.
#[derive(Debug)]
pub struct CloudImage {
    id: String,
    name: String,
    /// Provider-specific template data. Opaque to the reconciliation core.
    details: serde_json::Value,
    instances: RwLock<HashMap<String, Arc<CloudInstance>>>,
    error_state: ErrorState,
    /// While `now` is before this time the image is inside its sticky-error
    /// window and a clean health probe must not clear its errors.
    timeout_expires_at: RwLock<Option<DateTime<Utc>>>,
}

impl CloudImage {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        details: serde_json::Value,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            name: name.into(),
            details,
            instances: RwLock::new(HashMap::new()),
            error_state: ErrorState::new(),
            timeout_expires_at: RwLock::new(None),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn details(&self) -> &serde_json::Value {
        &self.details
    }

    pub fn error_state(&self) -> &ErrorState {
        &self.error_state
    }

    /// Replaces the image's error set.
    pub fn update_errors(&self, errors: Vec<CloudError>) {
        self.error_state.update(errors);
    }

    pub fn clear_errors(&self) {
        self.error_state.clear();
    }

    pub fn has_errors(&self) -> bool {
        self.error_state.has_errors()
    }

    /// Arms the sticky-error window to end `window` from now.
    pub fn arm_timeout(&self, window: Duration) {
        let expires_at = Utc::now() + window;
        *self
            .timeout_expires_at
            .write()
            .expect("timeout lock poisoned") = Some(expires_at);
    }

    /// Returns true while the sticky-error window is active.
    pub fn is_timed_out(&self) -> bool {
        self.timeout_expires_at
            .read()
            .expect("timeout lock poisoned")
            .is_some_and(|expires_at| Utc::now() < expires_at)
    }

    /// Inserts an instance keyed by its id, establishing the back-reference.
    ///
    /// Silently overwrites an existing entry with the same id.
    pub fn add_instance(self: &Arc<Self>, instance: Arc<CloudInstance>) {
        instance.set_image(self);
        self.instances
            .write()
            .expect("instance map lock poisoned")
            .insert(instance.instance_id().to_string(), instance);
    }

    pub fn find_instance_by_id(&self, instance_id: &str) -> Option<Arc<CloudInstance>> {
        self.instances
            .read()
            .expect("instance map lock poisoned")
            .get(instance_id)
            .cloned()
    }

    /// Removes an instance if present; no-op otherwise.
    pub fn remove_instance(&self, instance_id: &str) -> Option<Arc<CloudInstance>> {
        self.instances
            .write()
            .expect("instance map lock poisoned")
            .remove(instance_id)
    }

    /// Returns a point-in-time snapshot of the tracked instances.
    pub fn instances(&self) -> Vec<Arc<CloudInstance>> {
        self.instances
            .read()
            .expect("instance map lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Inserts a tracked instance for every observed entry whose name is not
    /// already a key in the map, seeded from the observation. Existing
    /// entries are left untouched; reconciling them is the task's job.
    pub fn detect_new_instances(
        self: &Arc<Self>,
        observed: &HashMap<String, ObservedInstance>,
    ) {
        for (name, observed_instance) in observed {
            if self.find_instance_by_id(name).is_none() {
                let instance = CloudInstance::from_observed(name.clone(), observed_instance);
                self.add_instance(Arc::new(instance));
            }
        }
    }
}
