//! A single tracked compute instance.
//!
//! An instance is a shared handle: the reconciliation task mutates it while
//! request-routing and status queries read it concurrently. Every mutable
//! field sits behind its own lock and no guard is held across an await
//! point, so readers never block on provider calls.

use std::sync::{Arc, RwLock, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ErrorState;
use crate::image::CloudImage;
use crate::status::InstanceStatus;

/// The provider's current report about one instance, fetched per cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedInstance {
    pub status: InstanceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_identity: Option<String>,
}

impl ObservedInstance {
    pub fn new(status: InstanceStatus) -> Self {
        Self {
            status,
            start_date: None,
            network_identity: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct StatusStamp {
    status: InstanceStatus,
    updated_at: DateTime<Utc>,
}

/// A tracked compute instance belonging to one image.
#[derive(Debug)]
pub struct CloudInstance {
    instance_id: String,
    name: String,
    status: RwLock<StatusStamp>,
    start_date: RwLock<Option<DateTime<Utc>>>,
    network_identity: RwLock<Option<String>>,
    error_state: ErrorState,
    /// Owning image. Weak: the back-reference is for lookup only and never
    /// drives the image's lifetime.
    image: RwLock<Weak<CloudImage>>,
}

impl CloudInstance {
    /// Creates a tracked instance with the given initial status.
    pub fn new(
        instance_id: impl Into<String>,
        name: impl Into<String>,
        status: InstanceStatus,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            name: name.into(),
            status: RwLock::new(StatusStamp {
                status,
                updated_at: Utc::now(),
            }),
            start_date: RwLock::new(None),
            network_identity: RwLock::new(None),
            error_state: ErrorState::new(),
            image: RwLock::new(Weak::new()),
        }
    }

    /// Creates an instance for a locally requested start.
    pub fn scheduled_to_start(instance_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(instance_id, name, InstanceStatus::ScheduledToStart)
    }

    /// Creates an instance seeded from a provider report.
    ///
    /// Used when reconciliation discovers an instance that is not yet
    /// tracked. The instance id equals the observed name, matching providers
    /// where the instance name is the API handle.
    pub fn from_observed(name: impl Into<String>, observed: &ObservedInstance) -> Self {
        let name = name.into();
        let instance = Self::new(name.clone(), name, observed.status);
        if let Some(start_date) = observed.start_date {
            instance.set_start_date(start_date);
        }
        if let Some(address) = &observed.network_identity {
            instance.set_network_identity(address.clone());
        }
        instance
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> InstanceStatus {
        self.status.read().expect("status lock poisoned").status
    }

    /// Timestamp of the last status transition.
    pub fn status_updated_at(&self) -> DateTime<Utc> {
        self.status.read().expect("status lock poisoned").updated_at
    }

    /// Sets the status and stamps the transition time.
    pub fn set_status(&self, status: InstanceStatus) {
        *self.status.write().expect("status lock poisoned") = StatusStamp {
            status,
            updated_at: Utc::now(),
        };
    }

    /// Overrides the last-transition timestamp.
    ///
    /// Rehydrating tracked state after a restart needs to restore the
    /// original transition time; stuck detection is meaningless against the
    /// rehydration instant.
    pub fn set_status_updated_at(&self, updated_at: DateTime<Utc>) {
        self.status.write().expect("status lock poisoned").updated_at = updated_at;
    }

    pub fn start_date(&self) -> Option<DateTime<Utc>> {
        *self.start_date.read().expect("start date lock poisoned")
    }

    pub fn set_start_date(&self, start_date: DateTime<Utc>) {
        *self.start_date.write().expect("start date lock poisoned") = Some(start_date);
    }

    pub fn network_identity(&self) -> Option<String> {
        self.network_identity
            .read()
            .expect("network identity lock poisoned")
            .clone()
    }

    pub fn set_network_identity(&self, address: impl Into<String>) {
        *self
            .network_identity
            .write()
            .expect("network identity lock poisoned") = Some(address.into());
    }

    pub fn error_state(&self) -> &ErrorState {
        &self.error_state
    }

    /// Returns the owning image, if it is still alive.
    pub fn image(&self) -> Option<Arc<CloudImage>> {
        self.image.read().expect("image lock poisoned").upgrade()
    }

    pub(crate) fn set_image(&self, image: &Arc<CloudImage>) {
        *self.image.write().expect("image lock poisoned") = Arc::downgrade(image);
    }
}
