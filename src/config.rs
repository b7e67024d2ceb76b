use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result, ensure};
use design_model::DesignStateSnapshot;
use serde::Deserialize;

use crate::image_ref::Candidate;
use crate::tabs::TabId;
use crate::tasks::loader::CrossOrigin;

pub const SUPPORTED_SAVE_TYPES: &[&str] = &["png", "jpeg", "jpg", "webp"];

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct CloudimageConfig {
    /// Cloudimage transformation query applied once per loaded image.
    pub loadable_query: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct EditorConfig {
    /// Image to edit: a URL/path string or, programmatically, a resolved handle.
    pub source: Option<Candidate>,
    /// Design state to restore; may embed its own `imgSrc`.
    pub loadable_design_state: Option<DesignStateSnapshot>,
    pub use_cloudimage: bool,
    pub cloudimage: Option<CloudimageConfig>,
    /// Disables the unsaved-changes veto on unload.
    pub avoid_changes_not_saved_alert_on_leave: bool,
    /// Fetch translations from the backend during the initial load.
    pub use_backend_translations: bool,
    pub translations: HashMap<String, String>,
    pub language: String,
    pub default_saved_image_name: String,
    pub default_saved_image_type: String,
    pub observe_plugin_container_size: bool,
    pub show_canvas_only: bool,
    pub no_cross_origin: bool,
    pub tabs_ids: Vec<TabId>,
    pub default_tab_id: Option<TabId>,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            source: None,
            loadable_design_state: None,
            use_cloudimage: false,
            cloudimage: None,
            avoid_changes_not_saved_alert_on_leave: false,
            use_backend_translations: false,
            translations: HashMap::new(),
            language: "en".to_string(),
            default_saved_image_name: "image".to_string(),
            default_saved_image_type: "png".to_string(),
            observe_plugin_container_size: false,
            show_canvas_only: false,
            no_cross_origin: false,
            tabs_ids: Vec::new(),
            default_tab_id: None,
        }
    }
}

impl EditorConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        serde_yaml::from_str(&data)
            .with_context(|| format!("failed to parse config at {}", path.display()))
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            !self.default_saved_image_name.trim().is_empty(),
            "default-saved-image-name must not be blank"
        );
        let save_type = self.default_saved_image_type.to_ascii_lowercase();
        ensure!(
            SUPPORTED_SAVE_TYPES.contains(&save_type.as_str()),
            "default-saved-image-type must be one of {:?}",
            SUPPORTED_SAVE_TYPES
        );
        ensure!(
            !self.language.trim().is_empty(),
            "language must not be blank"
        );
        if let Some(query) = self
            .cloudimage
            .as_ref()
            .and_then(|c| c.loadable_query.as_ref())
        {
            ensure!(
                !query.trim().is_empty(),
                "cloudimage.loadable-query must not be blank when provided"
            );
        }
        if let Some(snapshot) = &self.loadable_design_state {
            snapshot
                .validate("loadable-design-state")
                .context("invalid loadable-design-state")?;
        }
        Ok(self)
    }

    /// Query for the cloud-query resolver, only when cloudimage mode is on.
    pub fn cloud_query(&self) -> Option<&str> {
        if !self.use_cloudimage {
            return None;
        }
        self.cloudimage
            .as_ref()
            .and_then(|c| c.loadable_query.as_deref())
            .filter(|q| !q.trim().is_empty())
    }

    pub fn cross_origin(&self) -> CrossOrigin {
        if self.no_cross_origin {
            CrossOrigin::Omitted
        } else {
            CrossOrigin::Anonymous
        }
    }

    /// Extension and MIME type used for saved images.
    pub fn save_format(&self) -> (String, &'static str) {
        let extension = self.default_saved_image_type.to_ascii_lowercase();
        let mime = match extension.as_str() {
            "jpeg" | "jpg" => "image/jpeg",
            "webp" => "image/webp",
            _ => "image/png",
        };
        (extension, mime)
    }

    /// The image the initial mount loads: the snapshot's embedded URL wins
    /// over `source`.
    pub fn initial_candidate(&self) -> Option<Candidate> {
        self.loadable_design_state
            .as_ref()
            .and_then(|s| s.image_src())
            .map(Candidate::from)
            .or_else(|| self.source.clone())
    }
}
