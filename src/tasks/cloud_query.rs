use std::sync::atomic::{AtomicBool, Ordering};

use design_model::DesignPatch;
use design_model::cloudimage::query_to_patch;
use tracing::{debug, info};

use crate::config::EditorConfig;
use crate::store::EditorState;

/// Applies the configured cloudimage query at most once per active image.
#[derive(Debug, Default)]
pub struct CloudQueryResolver {
    fired: AtomicBool,
}

impl CloudQueryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the resolver eligible again; called when the active image changes.
    pub fn rearm(&self) {
        if self.fired.swap(false, Ordering::SeqCst) {
            debug!("cloud query re-armed");
        }
    }

    #[cfg(test)]
    pub(crate) fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Returns the derived patch when every precondition holds and the
    /// resolver has not fired for the current image yet.
    pub fn resolve(&self, config: &EditorConfig, state: &EditorState) -> Option<DesignPatch> {
        let query = config.cloud_query()?;
        let shown = state.shown_image_dimensions;
        if !shown.is_complete() {
            return None;
        }
        let original = state.original_image.as_ref()?.size()?;
        if self.fired.swap(true, Ordering::SeqCst) {
            return None;
        }
        info!(query, ?shown, ?original, "applying cloud query");
        Some(query_to_patch(query, shown, original))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CloudimageConfig;
    use crate::image_ref::{Bitmap, ImageHandle};
    use design_model::ShownImageDimensions;

    fn config() -> EditorConfig {
        EditorConfig {
            use_cloudimage: true,
            cloudimage: Some(CloudimageConfig {
                loadable_query: Some("r=90".to_string()),
            }),
            ..EditorConfig::default()
        }
    }

    fn state(shown: ShownImageDimensions) -> EditorState {
        EditorState {
            original_image: Some(ImageHandle::ready(
                Some("a.png".to_string()),
                Bitmap {
                    width: 4,
                    height: 2,
                    pixels: vec![0; 32],
                },
            )),
            shown_image_dimensions: shown,
            ..EditorState::default()
        }
    }

    #[test]
    fn fires_once_until_rearmed() {
        let resolver = CloudQueryResolver::new();
        let config = config();
        assert!(resolver.resolve(&config, &state(ShownImageDimensions::new(40.0, 20.0))).is_some());
        assert!(resolver.resolve(&config, &state(ShownImageDimensions::new(80.0, 40.0))).is_none());
        resolver.rearm();
        let patch = resolver
            .resolve(&config, &state(ShownImageDimensions::new(80.0, 40.0)))
            .unwrap();
        assert_eq!(patch.adjustments.map(|a| a.rotation), Some(90.0));
    }

    #[test]
    fn waits_for_complete_dimensions_and_an_image() {
        let resolver = CloudQueryResolver::new();
        let config = config();
        let partial = ShownImageDimensions {
            width: Some(10.0),
            height: None,
        };
        assert!(resolver.resolve(&config, &state(partial)).is_none());
        assert!(resolver.resolve(&config, &EditorState::default()).is_none());
        assert!(!resolver.has_fired());
    }

    #[test]
    fn inert_without_cloudimage_mode() {
        let resolver = CloudQueryResolver::new();
        let config = EditorConfig {
            use_cloudimage: false,
            ..config()
        };
        assert!(resolver.resolve(&config, &state(ShownImageDimensions::new(1.0, 1.0))).is_none());
    }
}
