//! Typed provider errors and the replaceable error set carried by images and
//! instances.

use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// A single typed error reported across the provider boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudError {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional underlying cause.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl CloudError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: Some(details.into()),
        }
    }
}

/// The current error set of an image or instance.
///
/// A passive container: the whole set is replaced atomically and any expiry
/// policy lives with the owner. "Has errors" is equivalent to the current
/// set being non-empty.
#[derive(Debug, Default)]
pub struct ErrorState {
    errors: RwLock<Vec<CloudError>>,
}

impl ErrorState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically replaces the error set. An empty vector clears it.
    pub fn update(&self, errors: Vec<CloudError>) {
        *self.errors.write().expect("error set lock poisoned") = errors;
    }

    /// Clears the error set.
    pub fn clear(&self) {
        self.update(Vec::new());
    }

    /// Returns the current error set, or `None` when it is empty.
    pub fn current(&self) -> Option<Vec<CloudError>> {
        let errors = self.errors.read().expect("error set lock poisoned");
        if errors.is_empty() {
            None
        } else {
            Some(errors.clone())
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.read().expect("error set lock poisoned").is_empty()
    }
}
