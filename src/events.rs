use std::time::Duration;

use design_model::{DesignPatch, ShownImageDimensions};
use serde::Serialize;

use crate::image_ref::ImageHandle;
use crate::tabs::TabId;

/// A message surfaced to the user. A zero duration persists until dismissed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedbackMessage {
    pub message: String,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl FeedbackMessage {
    pub fn persistent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            duration: Duration::ZERO,
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.duration.is_zero()
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u128::from(u64::MAX)) as u64)
    }
}

/// Container box size as reported by the host. `None` sides are undefined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ViewportSize {
    pub width: Option<f64>,
    pub height: Option<f64>,
}

impl ViewportSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
        }
    }

    pub fn is_defined(&self) -> bool {
        self.width.is_some() && self.height.is_some()
    }
}

/// Where a design patch came from; only host edits count as unsaved work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOrigin {
    Loadable,
    CloudQuery,
    Host,
}

/// Partial editor state pushed by internal merges or by the host.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatePatch {
    pub design: DesignPatch,
    /// Explicit dirty flag; when `None`, host edits that change the design
    /// mark the state as unsaved.
    pub have_not_saved_changes: Option<bool>,
}

impl From<DesignPatch> for StatePatch {
    fn from(design: DesignPatch) -> Self {
        Self {
            design,
            have_not_saved_changes: None,
        }
    }
}

/// Every mutation of [`crate::store::EditorState`] goes through one of these.
#[derive(Debug, Clone)]
pub enum Action {
    ShowLoader,
    HideLoader,
    /// `ticket` orders commits; results of loads requested before the
    /// currently committed one are discarded.
    SetOriginalImage { image: ImageHandle, ticket: u64 },
    /// The committed image was chosen again; loads ticketed before `ticket`
    /// must not replace it.
    KeepOriginalImage { ticket: u64 },
    SetFeedback(FeedbackMessage),
    DismissFeedback,
    UpdateState { patch: StatePatch, origin: PatchOrigin },
    SetShownImageDimensions(ShownImageDimensions),
    SelectTab(TabId),
    SetShownTabsMenu(bool),
}
