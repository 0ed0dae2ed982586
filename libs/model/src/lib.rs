//! # vmfleet-model
//!
//! State model for the vmfleet reconciliation core: tracked cloud instances,
//! the per-image instance registry, and provider error aggregation.
//!
//! ## Design Principles
//!
//! - The tracked view is a cache of the provider's world, not the source of
//!   truth; it is converged by the reconciliation task each cycle
//! - Instances and images are shared handles (`Arc`) with interior
//!   mutability, so readers never need external locking
//! - Error sets are replaced atomically as a whole; expiry policy lives with
//!   the owning image, never inside the container
//!
//! ## Modules
//!
//! - `status`: instance lifecycle status and its permanent/transitional split
//! - `errors`: typed provider errors and the replaceable error set
//! - `instance`: a single tracked compute instance
//! - `image`: an image template owning its instance registry
//! - `directory`: the top-level profile-keyed image cache

mod directory;
mod errors;
mod image;
mod instance;
mod status;

pub use directory::ImageDirectory;
pub use errors::{CloudError, ErrorState};
pub use image::CloudImage;
pub use instance::{CloudInstance, ObservedInstance};
pub use status::{InstanceStatus, ParseStatusError};
