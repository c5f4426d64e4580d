use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use image::RgbaImage;
use tracing::debug;

use super::DetectError;
use super::capture::TemplateLoader;

/// One decoded template, valid while its file's modification time is unchanged.
#[derive(Debug, Clone)]
pub struct TemplateCacheEntry {
    pub image_id: String,
    pub source_mtime: SystemTime,
    pub bitmap: Arc<RgbaImage>,
    pub width: u32,
    pub height: u32,
}

/// Decoded templates keyed by image id.
///
/// A lookup stats the file first; a changed modification time evicts the old bitmap
/// before the new one is decoded, so at most one bitmap per id is ever held.
#[derive(Debug, Default)]
pub struct TemplateCache {
    entries: HashMap<String, TemplateCacheEntry>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_load(
        &mut self,
        image_id: &str,
        path: &Path,
        loader: &dyn TemplateLoader,
    ) -> Result<Arc<RgbaImage>, DetectError> {
        let mtime = loader.modified(path)?;
        if let Some(entry) = self.entries.get(image_id) {
            if entry.source_mtime == mtime {
                return Ok(Arc::clone(&entry.bitmap));
            }
            debug!(target: "tactile::detect", image_id, "Template changed on disk, reloading");
            self.evict(image_id);
        }

        let bitmap = Arc::new(loader.load(path)?);
        debug!(
            target: "tactile::detect",
            image_id, path = %path.display(), width = bitmap.width(), height = bitmap.height(),
            "Loaded template"
        );
        self.entries.insert(
            image_id.to_string(),
            TemplateCacheEntry {
                image_id: image_id.to_string(),
                source_mtime: mtime,
                bitmap: Arc::clone(&bitmap),
                width: bitmap.width(),
                height: bitmap.height(),
            },
        );
        Ok(bitmap)
    }

    /// Drop the cached bitmap for `image_id`. Returns whether one was held.
    pub fn evict(&mut self, image_id: &str) -> bool {
        self.entries.remove(image_id).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn get(&self, image_id: &str) -> Option<&TemplateCacheEntry> {
        self.entries.get(image_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::capture::MemoryTemplateLoader;
    use image::Rgba;

    fn loader_with(path: &Path) -> MemoryTemplateLoader {
        let loader = MemoryTemplateLoader::new();
        loader.insert(path, RgbaImage::from_pixel(4, 3, Rgba([9, 9, 9, 255])));
        loader
    }

    #[test]
    fn repeated_lookups_share_one_bitmap() {
        let path = Path::new("images/button.png");
        let loader = loader_with(path);
        let mut cache = TemplateCache::new();

        let a = cache.get_or_load("button", path, &loader).unwrap();
        let b = cache.get_or_load("button", path, &loader).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(loader.loads(), 1);
        let entry = cache.get("button").unwrap();
        assert_eq!((entry.width, entry.height), (4, 3));
    }

    #[test]
    fn changed_mtime_reloads_exactly_once() {
        let path = Path::new("images/button.png");
        let loader = loader_with(path);
        let mut cache = TemplateCache::new();

        let first = cache.get_or_load("button", path, &loader).unwrap();
        loader.touch(path);
        let second = cache.get_or_load("button", path, &loader).unwrap();
        let third = cache.get_or_load("button", path, &loader).unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&second, &third));
        assert_eq!(loader.loads(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn evict_forces_reload() {
        let path = Path::new("images/button.png");
        let loader = loader_with(path);
        let mut cache = TemplateCache::new();
        cache.get_or_load("button", path, &loader).unwrap();
        assert!(cache.evict("button"));
        assert!(!cache.evict("button"));
        cache.get_or_load("button", path, &loader).unwrap();
        assert_eq!(loader.loads(), 2);
    }

    #[test]
    fn missing_template_is_an_error_and_not_cached() {
        let loader = MemoryTemplateLoader::new();
        let mut cache = TemplateCache::new();
        assert!(
            cache
                .get_or_load("nope", Path::new("images/nope.png"), &loader)
                .is_err()
        );
        assert!(cache.is_empty());
    }
}
