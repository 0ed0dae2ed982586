//! Client capability consumed by the reconciliation task.
//!
//! The client is the orchestrating owner of a set of images. The task only
//! needs to enumerate them and, after a cycle, ask the client to recompute
//! its own top-level error status.

use std::sync::{Arc, RwLock};

use vmfleet_model::{CloudImage, ErrorState};

/// Orchestrating owner of the image set.
pub trait CloudClient: Send + Sync {
    /// The full set of images to reconcile.
    fn images(&self) -> Vec<Arc<CloudImage>>;

    /// Recomputes the client's aggregate error status from its images.
    ///
    /// Called once at the end of every reconciliation cycle.
    fn update_errors(&self);
}

/// A client over a fixed, externally managed image set.
///
/// Aggregates the error sets of all its images into one client-level error
/// state. Suitable for embedders that manage image membership themselves,
/// and for tests.
#[derive(Default)]
pub struct StaticClient {
    images: RwLock<Vec<Arc<CloudImage>>>,
    error_state: ErrorState,
}

impl StaticClient {
    pub fn new(images: Vec<Arc<CloudImage>>) -> Self {
        Self {
            images: RwLock::new(images),
            error_state: ErrorState::new(),
        }
    }

    pub fn add_image(&self, image: Arc<CloudImage>) {
        self.images
            .write()
            .expect("image set lock poisoned")
            .push(image);
    }

    /// The client-level aggregate of its images' error sets.
    pub fn error_state(&self) -> &ErrorState {
        &self.error_state
    }
}

impl CloudClient for StaticClient {
    fn images(&self) -> Vec<Arc<CloudImage>> {
        self.images.read().expect("image set lock poisoned").clone()
    }

    fn update_errors(&self) {
        let aggregated = self
            .images()
            .iter()
            .filter_map(|image| image.error_state().current())
            .flatten()
            .collect();
        self.error_state.update(aggregated);
    }
}
