//! Handles through which a host outside the controller's event flow pushes
//! state in and pulls image data out.
//!
//! The host owns the slots; the controller only assigns them, once per mount.

use std::fmt;
use std::sync::Arc;

use design_model::DesignStateSnapshot;
use parking_lot::RwLock;
use serde::Serialize;

use crate::config::EditorConfig;
use crate::events::StatePatch;
use crate::image_ref::ImageHandle;
use crate::store::EditorState;

/// A host-owned mutable cell the controller writes callables into.
pub trait HostSlot<T>: Send + Sync {
    fn set(&self, value: T);
}

/// Stock [`HostSlot`]: remembers the last value written.
pub struct FnCell<T> {
    value: RwLock<Option<T>>,
}

impl<T> Default for FnCell<T> {
    fn default() -> Self {
        Self {
            value: RwLock::new(None),
        }
    }
}

impl<T: Clone> FnCell<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<T> {
        self.value.read().clone()
    }
}

impl<T: Send + Sync> HostSlot<T> for FnCell<T> {
    fn set(&self, value: T) {
        *self.value.write() = Some(value);
    }
}

/// Either a literal patch or a function of the current state.
pub enum StateUpdate {
    Patch(StatePatch),
    With(Box<dyn FnOnce(&EditorState) -> StatePatch + Send>),
}

impl StateUpdate {
    pub fn with(f: impl FnOnce(&EditorState) -> StatePatch + Send + 'static) -> Self {
        StateUpdate::With(Box::new(f))
    }
}

impl From<StatePatch> for StateUpdate {
    fn from(patch: StatePatch) -> Self {
        StateUpdate::Patch(patch)
    }
}

impl fmt::Debug for StateUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateUpdate::Patch(patch) => f.debug_tuple("Patch").field(patch).finish(),
            StateUpdate::With(_) => f.write_str("With(..)"),
        }
    }
}

pub type UpdateStateFn = Arc<dyn Fn(StateUpdate) + Send + Sync>;
pub type CurrentImgDataFn = Arc<dyn Fn() -> Option<CurrentImageData> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageData {
    pub name: String,
    pub extension: String,
    pub mime_type: String,
    pub full_name: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentImageData {
    pub image_data: ImageData,
    pub design_state: DesignStateSnapshot,
    /// Pixel source of the committed image.
    #[serde(skip)]
    pub image: ImageHandle,
}

/// Builds the host-facing view of the committed image and its design.
/// Returns `None` until an image has been committed.
pub fn current_image_data(state: &EditorState, config: &EditorConfig) -> Option<CurrentImageData> {
    let image = state.original_image.clone()?;
    let original = image.size()?;
    let design = &state.design;

    let (mut width, mut height) = match (design.resize.width, design.resize.height) {
        (Some(w), Some(h)) => (w, h),
        _ if design.adjustments.crop.is_set() => {
            let crop = &design.adjustments.crop;
            let shown = state.shown_image_dimensions;
            // Crops are kept relative to the rendered image.
            let (scale_x, scale_y) = match (shown.width, shown.height) {
                (Some(sw), Some(sh)) if shown.is_complete() => {
                    (f64::from(original.width) / sw, f64::from(original.height) / sh)
                }
                _ => (1.0, 1.0),
            };
            (
                crop.width.unwrap_or_default() * scale_x,
                crop.height.unwrap_or_default() * scale_y,
            )
        }
        _ => (f64::from(original.width), f64::from(original.height)),
    };
    if design.adjustments.is_quarter_turn() {
        std::mem::swap(&mut width, &mut height);
    }

    let name = image
        .name()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| config.default_saved_image_name.clone());
    let (extension, mime_type) = config.save_format();
    Some(CurrentImageData {
        image_data: ImageData {
            full_name: format!("{name}.{extension}"),
            name,
            extension,
            mime_type: mime_type.to_string(),
            width: width.round().max(0.0) as u32,
            height: height.round().max(0.0) as u32,
        },
        design_state: design.to_snapshot(image.src().map(str::to_string)),
        image,
    })
}
