//! Style registry: named transformations applied to the cached original.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use attache_core::constants::ORIGINAL_STYLE;
use attache_core::{CacheDir, FileCategory};

use crate::error::UploadError;

/// Context handed to a transformation alongside the cached original path.
#[derive(Debug, Clone)]
pub struct TransformContext {
    pub style: String,
    pub original_filename: String,
    pub content_type: Option<String>,
    pub category: FileCategory,
    /// Scratch directory for allocating output files.
    pub cache: CacheDir,
}

/// A transformation deriving a new local file from the cached original.
///
/// Returning `Ok(None)` skips the style: no record is created for it.
#[async_trait]
pub trait StyleTransform: Send + Sync {
    async fn derive(
        &self,
        ctx: &TransformContext,
        original: &Path,
    ) -> anyhow::Result<Option<PathBuf>>;
}

/// Adapter turning a plain closure into a [`StyleTransform`].
pub struct FnStyle<F> {
    func: F,
}

impl<F> FnStyle<F>
where
    F: Fn(&TransformContext, &Path) -> anyhow::Result<Option<PathBuf>> + Send + Sync,
{
    pub fn new(func: F) -> Self {
        FnStyle { func }
    }
}

#[async_trait]
impl<F> StyleTransform for FnStyle<F>
where
    F: Fn(&TransformContext, &Path) -> anyhow::Result<Option<PathBuf>> + Send + Sync,
{
    async fn derive(
        &self,
        ctx: &TransformContext,
        original: &Path,
    ) -> anyhow::Result<Option<PathBuf>> {
        (self.func)(ctx, original)
    }
}

/// Ordered mapping from style name to its transformation.
///
/// Iteration order is registration order; registering an existing name
/// replaces the transformation in place.
#[derive(Default)]
pub struct StyleRegistry {
    entries: Vec<(String, Arc<dyn StyleTransform>)>,
}

impl StyleRegistry {
    pub fn new() -> Self {
        StyleRegistry::default()
    }

    pub fn add(
        &mut self,
        style_name: &str,
        transform: Arc<dyn StyleTransform>,
    ) -> Result<(), UploadError> {
        if style_name == ORIGINAL_STYLE {
            return Err(UploadError::ReservedStyle);
        }
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|(name, _)| name == style_name)
        {
            entry.1 = transform;
        } else {
            self.entries.push((style_name.to_string(), transform));
        }
        Ok(())
    }

    pub fn add_fn<F>(&mut self, style_name: &str, func: F) -> Result<(), UploadError>
    where
        F: Fn(&TransformContext, &Path) -> anyhow::Result<Option<PathBuf>>
            + Send
            + Sync
            + 'static,
    {
        self.add(style_name, Arc::new(FnStyle::new(func)))
    }

    pub fn get(&self, style_name: &str) -> Option<&Arc<dyn StyleTransform>> {
        self.entries
            .iter()
            .find(|(name, _)| name == style_name)
            .map(|(_, transform)| transform)
    }

    /// Styles in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn StyleTransform>)> {
        self.entries
            .iter()
            .map(|(name, transform)| (name.as_str(), transform))
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
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

    fn noop() -> Arc<dyn StyleTransform> {
        Arc::new(FnStyle::new(|_ctx: &TransformContext, _original: &Path| Ok(None)))
    }

    #[test]
    fn test_registration_order_preserved() {
        let mut registry = StyleRegistry::new();
        registry.add("thumb", noop()).unwrap();
        registry.add("web", noop()).unwrap();
        registry.add("tiny", noop()).unwrap();
        assert_eq!(registry.names(), vec!["thumb", "web", "tiny"]);

        // Re-registering keeps the original position.
        registry.add("web", noop()).unwrap();
        assert_eq!(registry.names(), vec!["thumb", "web", "tiny"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_original_is_reserved() {
        let mut registry = StyleRegistry::new();
        assert!(matches!(
            registry.add("original", noop()),
            Err(UploadError::ReservedStyle)
        ));
    }
}
