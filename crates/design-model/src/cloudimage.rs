//! Translates a cloudimage transformation query (`tl_px=..&br_px=..&r=90`)
//! into design-state fields for the currently shown image.
//!
//! Crop coordinates in the query are expressed in native image pixels while
//! the editor keeps crops relative to the rendered image, so they are scaled
//! by `shown / original` on each axis.

use std::collections::BTreeMap;

use tracing::debug;

use crate::{
    Adjustments, Crop, DesignPatch, Filter, Finetune, ImageSize, Resize, ShownImageDimensions,
};

fn parse_point(value: &str) -> Option<(f64, f64)> {
    let (x, y) = value.split_once(',')?;
    let x = x.trim().parse::<f64>().ok()?;
    let y = y.trim().parse::<f64>().ok()?;
    (x.is_finite() && y.is_finite()).then_some((x, y))
}

fn parse_number(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn query_to_patch(
    query: &str,
    shown: ShownImageDimensions,
    original: ImageSize,
) -> DesignPatch {
    let query = query.trim().trim_start_matches('?');
    let mut top_left = None;
    let mut bottom_right = None;
    let mut rotation = None;
    let mut flip = None;
    let mut resize = Resize::default();
    let mut finetunes = Vec::new();
    let mut props = BTreeMap::new();
    let mut filter = None;

    for pair in query.split('&').filter(|pair| !pair.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        match key {
            "tl_px" => top_left = parse_point(value),
            "br_px" => bottom_right = parse_point(value),
            "r" | "rotate" => rotation = parse_number(value).map(|deg| deg.rem_euclid(360.0)),
            "flip" => flip = Some(value.to_ascii_lowercase()),
            "w" | "width" => resize.width = parse_number(value).filter(|v| *v > 0.0),
            "h" | "height" => resize.height = parse_number(value).filter(|v| *v > 0.0),
            "bright" => {
                if let Some(value) = parse_number(value) {
                    finetunes.push(Finetune::Brighten);
                    props.insert("brightness".to_string(), value / 100.0);
                }
            }
            "contrast" => {
                if let Some(value) = parse_number(value) {
                    finetunes.push(Finetune::Contrast);
                    props.insert("contrast".to_string(), value);
                }
            }
            "blur" => {
                if let Some(value) = parse_number(value) {
                    finetunes.push(Finetune::Blur);
                    props.insert("blurRadius".to_string(), value);
                }
            }
            "f" => {
                filter = match value.to_ascii_lowercase().as_str() {
                    "grey" | "gray" => Some(Filter::Grayscale),
                    "sepia" => Some(Filter::Sepia),
                    "invert" => Some(Filter::Invert),
                    other => {
                        debug!(filter = other, "ignoring unsupported cloudimage filter");
                        None
                    }
                }
            }
            other => debug!(key = other, "ignoring cloudimage query parameter"),
        }
    }

    let crop = match (top_left, bottom_right) {
        (Some((x0, y0)), Some((x1, y1)))
            if x1 > x0 && y1 > y0 && original.width > 0 && original.height > 0 =>
        {
            let scale_x = shown.width.unwrap_or(0.0) / f64::from(original.width);
            let scale_y = shown.height.unwrap_or(0.0) / f64::from(original.height);
            Some(Crop {
                x: x0 * scale_x,
                y: y0 * scale_y,
                width: Some((x1 - x0) * scale_x),
                height: Some((y1 - y0) * scale_y),
                ratio: None,
            })
        }
        _ => None,
    };

    let adjustments = if crop.is_some() || rotation.is_some() || flip.is_some() {
        let flip = flip.unwrap_or_default();
        Some(Adjustments {
            crop: crop.unwrap_or_default(),
            rotation: rotation.unwrap_or(0.0),
            is_flipped_x: flip.contains('h'),
            is_flipped_y: flip.contains('v'),
        })
    } else {
        None
    };

    DesignPatch {
        adjustments,
        filter: filter.map(Some),
        finetunes: (!finetunes.is_empty()).then_some(finetunes),
        finetunes_props: (!props.is_empty()).then_some(props),
        annotations: None,
        resize: (resize.width.is_some() || resize.height.is_some()).then_some(resize),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGINAL: ImageSize = ImageSize {
        width: 2000,
        height: 1000,
    };

    #[test]
    fn crop_is_scaled_to_shown_dimensions() {
        let patch = query_to_patch(
            "?tl_px=200,100&br_px=1200,600",
            ShownImageDimensions::new(1000.0, 500.0),
            ORIGINAL,
        );
        let crop = patch.adjustments.expect("adjustments").crop;
        assert_eq!(crop.x, 100.0);
        assert_eq!(crop.y, 50.0);
        assert_eq!(crop.width, Some(500.0));
        assert_eq!(crop.height, Some(250.0));
    }

    #[test]
    fn rotation_flip_and_resize() {
        let patch = query_to_patch(
            "r=450&flip=hv&w=640&h=0",
            ShownImageDimensions::new(1.0, 1.0),
            ORIGINAL,
        );
        let adjustments = patch.adjustments.unwrap();
        assert_eq!(adjustments.rotation, 90.0);
        assert!(adjustments.is_flipped_x && adjustments.is_flipped_y);
        let resize = patch.resize.unwrap();
        assert_eq!(resize.width, Some(640.0));
        assert_eq!(resize.height, None);
    }

    #[test]
    fn finetunes_and_filter() {
        let patch = query_to_patch(
            "bright=20&blur=3&f=grey&unknown=1",
            ShownImageDimensions::new(1.0, 1.0),
            ORIGINAL,
        );
        assert_eq!(
            patch.finetunes,
            Some(vec![Finetune::Brighten, Finetune::Blur])
        );
        let props = patch.finetunes_props.unwrap();
        assert_eq!(props["brightness"], 0.2);
        assert_eq!(props["blurRadius"], 3.0);
        assert_eq!(patch.filter, Some(Some(Filter::Grayscale)));
        assert!(patch.adjustments.is_none());
    }

    #[test]
    fn inverted_corners_produce_no_crop() {
        let patch = query_to_patch(
            "tl_px=500,500&br_px=100,100",
            ShownImageDimensions::new(10.0, 10.0),
            ORIGINAL,
        );
        assert!(patch.is_empty());
    }
}
