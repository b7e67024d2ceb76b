use std::collections::BTreeMap;

use anyhow::{Result, ensure};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use tracing::warn;

pub mod cloudimage;

pub use descriptors::{Filter, Finetune};
pub use geometry::{Adjustments, Crop, CropRatio, ImageSize, Resize, ShownImageDimensions};

mod descriptors {
    /// Lowercases and strips separators so `black_and_white`, `Black-And-White`
    /// and `BlackAndWhite` all resolve to the same descriptor.
    fn normalize(identifier: &str) -> String {
        identifier
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .map(|c| c.to_ascii_lowercase())
            .collect()
    }

    macro_rules! descriptor_enum {
        ($(#[$meta:meta])* $name:ident { $($variant:ident => $ident:literal),+ $(,)? }) => {
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub enum $name {
                $($variant),+
            }

            impl $name {
                pub const ALL: &'static [$name] = &[$($name::$variant),+];

                /// Canonical string identifier used in serialized design state.
                pub fn identifier(self) -> &'static str {
                    match self {
                        $($name::$variant => $ident),+
                    }
                }

                pub fn from_identifier(identifier: &str) -> Option<Self> {
                    let wanted = normalize(identifier);
                    if wanted.is_empty() {
                        return None;
                    }
                    Self::ALL
                        .iter()
                        .copied()
                        .find(|candidate| normalize(candidate.identifier()) == wanted)
                }
            }

            impl std::fmt::Display for $name {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    f.write_str(self.identifier())
                }
            }
        };
    }

    descriptor_enum! {
        /// Preset colour filters understood by the canvas.
        Filter {
            Invert => "Invert",
            Grayscale => "Grayscale",
            Sepia => "Sepia",
            Solarize => "Solarize",
            BlackAndWhite => "BlackAndWhite",
            Vintage => "Vintage",
            Clarendon => "Clarendon",
            Gingham => "Gingham",
            Moon => "Moon",
            Lark => "Lark",
            Reyes => "Reyes",
            Juno => "Juno",
            Slumber => "Slumber",
            Crema => "Crema",
            Ludwig => "Ludwig",
            Aden => "Aden",
            Perpetua => "Perpetua",
            Amaro => "Amaro",
            Mayfair => "Mayfair",
            Rise => "Rise",
            Hudson => "Hudson",
            Valencia => "Valencia",
            XPro2 => "XPro2",
            Sierra => "Sierra",
            Willow => "Willow",
            LoFi => "LoFi",
            Inkwell => "Inkwell",
            Hefe => "Hefe",
            Nashville => "Nashville",
            Earlybird => "Earlybird",
            Brannan => "Brannan",
            Toaster => "Toaster",
            Walden => "Walden",
        }
    }

    descriptor_enum! {
        /// Fine-tune adjustments; their strengths live in `finetunesProps`.
        Finetune {
            Brighten => "Brighten",
            Contrast => "Contrast",
            Hsv => "HSV",
            Warmth => "Warmth",
            Blur => "Blur",
            Threshold => "Threshold",
            Posterize => "Posterize",
            Pixelate => "Pixelate",
            Noise => "Noise",
        }
    }
}

mod geometry {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(untagged)]
    pub enum CropRatio {
        Fixed(f64),
        Named(String),
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct Crop {
        pub x: f64,
        pub y: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub width: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub height: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub ratio: Option<CropRatio>,
    }

    impl Crop {
        pub fn is_set(&self) -> bool {
            matches!((self.width, self.height), (Some(w), Some(h)) if w > 0.0 && h > 0.0)
        }

        pub fn validate(&self, prefix: &str) -> Result<()> {
            ensure!(
                self.x.is_finite() && self.y.is_finite(),
                "{}.crop position must be finite",
                prefix
            );
            for (field, value) in [("width", self.width), ("height", self.height)] {
                if let Some(value) = value {
                    ensure!(
                        value.is_finite() && value >= 0.0,
                        "{}.crop.{} must be non-negative",
                        prefix,
                        field
                    );
                }
            }
            Ok(())
        }
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct Adjustments {
        pub crop: Crop,
        pub rotation: f64,
        pub is_flipped_x: bool,
        pub is_flipped_y: bool,
    }

    impl Adjustments {
        /// True for 90 and 270 degree turns, where output width and height swap.
        pub fn is_quarter_turn(&self) -> bool {
            let turns = (self.rotation.rem_euclid(360.0) / 90.0).round() as i64;
            turns % 2 == 1
        }
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct Resize {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub width: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub height: Option<f64>,
        pub manual_change_disabled: bool,
    }

    impl Resize {
        pub fn validate(&self, prefix: &str) -> Result<()> {
            for (field, value) in [("width", self.width), ("height", self.height)] {
                if let Some(value) = value {
                    ensure!(
                        value.is_finite() && value > 0.0,
                        "{}.resize.{} must be positive",
                        prefix,
                        field
                    );
                }
            }
            Ok(())
        }
    }

    /// Native pixel size of a decoded image.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ImageSize {
        pub width: u32,
        pub height: u32,
    }

    /// On-screen size of the rendered image, reported by the presentation layer.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct ShownImageDimensions {
        pub width: Option<f64>,
        pub height: Option<f64>,
    }

    impl ShownImageDimensions {
        pub fn new(width: f64, height: f64) -> Self {
            Self {
                width: Some(width),
                height: Some(height),
            }
        }

        /// Both dimensions are present, finite and non-zero.
        pub fn is_complete(&self) -> bool {
            [self.width, self.height]
                .into_iter()
                .all(|value| matches!(value, Some(v) if v.is_finite() && v != 0.0))
        }
    }
}

/// Internal editing parameters with decoded filter and finetune descriptors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DesignState {
    pub adjustments: Adjustments,
    pub filter: Option<Filter>,
    pub finetunes: Vec<Finetune>,
    pub finetunes_props: BTreeMap<String, f64>,
    pub annotations: BTreeMap<String, JsonValue>,
    pub resize: Resize,
}

/// Partial design state. `None` leaves the corresponding field untouched;
/// `filter: Some(None)` clears the filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DesignPatch {
    pub adjustments: Option<Adjustments>,
    pub filter: Option<Option<Filter>>,
    pub finetunes: Option<Vec<Finetune>>,
    pub finetunes_props: Option<BTreeMap<String, f64>>,
    pub annotations: Option<BTreeMap<String, JsonValue>>,
    pub resize: Option<Resize>,
}

impl DesignPatch {
    pub fn is_empty(&self) -> bool {
        self.adjustments.is_none()
            && self.filter.is_none()
            && self.finetunes.is_none()
            && self.finetunes_props.is_none()
            && self.annotations.is_none()
            && self.resize.is_none()
    }
}

impl DesignState {
    /// Top-level shallow merge. Returns whether any field changed value.
    pub fn apply(&mut self, patch: DesignPatch) -> bool {
        let before = self.clone();
        let DesignPatch {
            adjustments,
            filter,
            finetunes,
            finetunes_props,
            annotations,
            resize,
        } = patch;
        if let Some(adjustments) = adjustments {
            self.adjustments = adjustments;
        }
        if let Some(filter) = filter {
            self.filter = filter;
        }
        if let Some(finetunes) = finetunes {
            self.finetunes = finetunes;
        }
        if let Some(props) = finetunes_props {
            self.finetunes_props = props;
        }
        if let Some(annotations) = annotations {
            self.annotations = annotations;
        }
        if let Some(resize) = resize {
            self.resize = resize;
        }
        *self != before
    }

    pub fn to_snapshot(&self, img_src: Option<String>) -> DesignStateSnapshot {
        DesignStateSnapshot {
            img_src,
            adjustments: Some(self.adjustments.clone()),
            filter: Some(self.filter.map(|f| f.identifier().to_string())),
            finetunes: Some(
                self.finetunes
                    .iter()
                    .map(|f| f.identifier().to_string())
                    .collect(),
            ),
            finetunes_props: Some(self.finetunes_props.clone()),
            annotations: Some(self.annotations.clone()),
            resize: Some(self.resize.clone()),
        }
    }
}

/// Serialized design state as exchanged with hosts. Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DesignStateSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub img_src: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adjustments: Option<Adjustments>,
    /// Absent leaves the filter alone; an explicit `null` clears it.
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub filter: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finetunes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finetunes_props: Option<BTreeMap<String, f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, JsonValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resize: Option<Resize>,
}

// Maps a present key to `Some`, so an explicit `null` survives as `Some(None)`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl DesignStateSnapshot {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Image URL embedded in the snapshot, ignoring blank strings.
    pub fn image_src(&self) -> Option<&str> {
        self.img_src
            .as_deref()
            .map(str::trim)
            .filter(|src| !src.is_empty())
    }

    /// Converts string descriptors into internal variants. Unknown finetune
    /// identifiers are dropped; an unknown filter decodes to no filter.
    pub fn decode(&self) -> DesignPatch {
        let filter = self.filter.as_ref().map(|name| {
            let name = name.as_deref()?;
            let decoded = Filter::from_identifier(name);
            if decoded.is_none() {
                warn!(filter = name, "unknown filter identifier; clearing filter");
            }
            decoded
        });
        let finetunes = self.finetunes.as_ref().map(|names| {
            names
                .iter()
                .filter_map(|name| {
                    let decoded = Finetune::from_identifier(name);
                    if decoded.is_none() {
                        warn!(finetune = %name, "dropping unknown finetune identifier");
                    }
                    decoded
                })
                .collect()
        });
        DesignPatch {
            adjustments: self.adjustments.clone(),
            filter,
            finetunes,
            finetunes_props: self.finetunes_props.clone(),
            annotations: self.annotations.clone(),
            resize: self.resize.clone(),
        }
    }

    pub fn validate(&self, prefix: &str) -> Result<()> {
        if let Some(adjustments) = &self.adjustments {
            adjustments.crop.validate(prefix)?;
            ensure!(
                adjustments.rotation.is_finite(),
                "{}.adjustments.rotation must be finite",
                prefix
            );
        }
        if let Some(resize) = &self.resize {
            resize.validate(prefix)?;
        }
        if let Some(props) = &self.finetunes_props {
            for (name, value) in props {
                ensure!(
                    value.is_finite(),
                    "{}.finetunesProps.{} must be finite",
                    prefix,
                    name
                );
            }
        }
        Ok(())
    }
}
