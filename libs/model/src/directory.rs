//! Top-level directory of images across profiles.
//!
//! Images are created once per (profile, source template) pair and cached
//! here so a rebuilt client can pick up the instance registry it already
//! accumulated.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::image::CloudImage;

/// Profile-keyed cache of images.
#[derive(Debug, Default)]
pub struct ImageDirectory {
    images: RwLock<HashMap<String, Arc<CloudImage>>>,
}

impl ImageDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_image(&self, profile_id: &str, source_id: &str) -> Option<Arc<CloudImage>> {
        let key = Self::key(profile_id, source_id);
        self.images
            .read()
            .expect("image directory lock poisoned")
            .get(&key)
            .cloned()
    }

    /// Caches an image under its profile, keyed by the image's own id as the
    /// source id. Overwrites any previous entry for the pair.
    pub fn add_image(&self, profile_id: &str, image: Arc<CloudImage>) {
        let key = Self::key(profile_id, image.id());
        self.images
            .write()
            .expect("image directory lock poisoned")
            .insert(key, image);
    }

    fn key(profile_id: &str, source_id: &str) -> String {
        format!("{profile_id}-{source_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_returns_image_added_for_profile() {
        let directory = ImageDirectory::new();
        let image = CloudImage::new("ubuntu-lts", "ubuntu-lts", serde_json::Value::Null);
        directory.add_image("profile1", Arc::clone(&image));

        let found = directory.find_image("profile1", "ubuntu-lts").unwrap();
        assert!(Arc::ptr_eq(&found, &image));
    }

    #[test]
    fn profiles_do_not_share_entries() {
        let directory = ImageDirectory::new();
        let image = CloudImage::new("ubuntu-lts", "ubuntu-lts", serde_json::Value::Null);
        directory.add_image("profile1", image);

        assert!(directory.find_image("profile2", "ubuntu-lts").is_none());
    }

    #[test]
    fn add_overwrites_same_pair() {
        let directory = ImageDirectory::new();
        let first = CloudImage::new("ubuntu-lts", "old", serde_json::Value::Null);
        let second = CloudImage::new("ubuntu-lts", "new", serde_json::Value::Null);
        directory.add_image("profile1", first);
        directory.add_image("profile1", Arc::clone(&second));

        let found = directory.find_image("profile1", "ubuntu-lts").unwrap();
        assert!(Arc::ptr_eq(&found, &second));
    }
}
