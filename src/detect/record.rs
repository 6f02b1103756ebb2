use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const DEFAULT_COLOR: &str = "#00FF00";
pub const UNKNOWN_CLASS: &str = "unknown_class";

lazy_static! {
    // python dict repr written by ultralytics exports: {0: 'fire', 1: 'smoke'}
    static ref NAME_ENTRY: Regex = Regex::new(r#"(\d+)\s*:\s*(?:'([^']*)'|"([^"]*)")"#).unwrap();
}

pub fn class_color(class_name: &str) -> &'static str {
    match class_name.to_lowercase().as_str() {
        "fire" => "#FF0000",
        "smoke" => "#A9A9A9",
        _ => DEFAULT_COLOR,
    }
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Center-form box in original image pixels.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Detection {
    #[serde(rename = "class")]
    pub class_name: String,
    pub confidence: f64,
    pub bbox: BoundingBox,
    pub color: String,
}

/// A model output mapped back to the source image, before naming and rounding.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub class_id: usize,
    pub confidence: f32,
    pub cx: f32,
    pub cy: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassNames(HashMap<usize, String>);

impl ClassNames {
    pub fn parse(raw: &str) -> Self {
        Self(
            NAME_ENTRY
                .captures_iter(raw)
                .filter_map(|caps| {
                    let id = caps.get(1)?.as_str().parse().ok()?;
                    let name = caps.get(2).or_else(|| caps.get(3))?.as_str().to_string();
                    Some((id, name))
                })
                .collect(),
        )
    }

    pub fn get(&self, class_id: usize) -> &str {
        self.0
            .get(&class_id)
            .map(String::as_str)
            .unwrap_or(UNKNOWN_CLASS)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for ClassNames {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).enumerate().collect())
    }
}

/// Case-insensitive allow-list. Empty accepts everything.
#[derive(Debug, Clone, Default)]
pub struct ClassFilter {
    allowed: Vec<String>,
}

impl ClassFilter {
    pub fn new(classes: &[String]) -> Self {
        Self {
            allowed: classes.iter().map(|x| x.to_lowercase()).collect(),
        }
    }

    pub fn accepts(&self, class_name: &str) -> bool {
        self.allowed.is_empty() || self.allowed.contains(&class_name.to_lowercase())
    }
}

/// Names, filters, colors and rounds raw detections, keeping their order.
pub fn normalize(raw: &[RawDetection], names: &ClassNames, filter: &ClassFilter) -> Vec<Detection> {
    raw.iter()
        .filter_map(|det| {
            let class_name = names.get(det.class_id);
            if !filter.accepts(class_name) {
                return None;
            }
            Some(Detection {
                class_name: class_name.to_string(),
                confidence: round_to(det.confidence as f64, 4),
                bbox: BoundingBox {
                    x: round_to(det.cx as f64, 2),
                    y: round_to(det.cy as f64, 2),
                    width: round_to(det.width as f64, 2),
                    height: round_to(det.height as f64, 2),
                },
                color: class_color(class_name).to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(class_id: usize, confidence: f32) -> RawDetection {
        RawDetection {
            class_id,
            confidence,
            cx: 120.456_78,
            cy: 80.004_9,
            width: 33.333_33,
            height: 10.0,
        }
    }

    fn fire_smoke() -> ClassNames {
        ["fire", "smoke"].into_iter().collect()
    }

    #[test]
    fn filter_keeps_only_requested_class() {
        let out = normalize(
            &[raw(0, 0.9), raw(1, 0.8)],
            &fire_smoke(),
            &ClassFilter::new(&["fire".to_string()]),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].class_name, "fire");
        assert_eq!(out[0].color, "#FF0000");
    }

    #[test]
    fn filter_is_case_insensitive_and_empty_accepts_all() {
        let names: ClassNames = ["Fire", "smoke"].into_iter().collect();
        let out = normalize(
            &[raw(0, 0.9), raw(1, 0.8)],
            &names,
            &ClassFilter::new(&["FIRE".to_string()]),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].class_name, "Fire");
        assert_eq!(out[0].color, "#FF0000");

        let all = normalize(&[raw(1, 0.8), raw(0, 0.9)], &names, &ClassFilter::default());
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].class_name, "smoke");
        assert_eq!(all[0].color, "#A9A9A9");
    }

    #[test]
    fn values_are_rounded() {
        let out = normalize(&[raw(0, 0.876_543)], &fire_smoke(), &ClassFilter::default());
        assert_eq!(out[0].confidence, 0.8765);
        assert_eq!(
            out[0].bbox,
            BoundingBox {
                x: 120.46,
                y: 80.0,
                width: 33.33,
                height: 10.0,
            }
        );
    }

    #[test]
    fn unmapped_ids_and_colors_fall_back() {
        let out = normalize(&[raw(7, 0.5)], &fire_smoke(), &ClassFilter::default());
        assert_eq!(out[0].class_name, UNKNOWN_CLASS);
        assert_eq!(out[0].color, DEFAULT_COLOR);
        assert_eq!(class_color("person"), DEFAULT_COLOR);
        assert_eq!(class_color("SMOKE"), "#A9A9A9");
    }

    #[test]
    fn parses_ultralytics_names_metadata() {
        let names = ClassNames::parse("{0: 'fire', 1: 'smoke', 2: \"hot spot\"}");
        assert_eq!(names.len(), 3);
        assert_eq!(names.get(0), "fire");
        assert_eq!(names.get(1), "smoke");
        assert_eq!(names.get(2), "hot spot");
        assert_eq!(names.get(3), UNKNOWN_CLASS);
        assert!(ClassNames::parse("").is_empty());
    }

    #[test]
    fn serializes_with_wire_field_names() {
        let out = normalize(&[raw(0, 0.9)], &fire_smoke(), &ClassFilter::default());
        let json = serde_json::to_value(&out[0]).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "class": "fire",
                "confidence": 0.9,
                "bbox": {"x": 120.46, "y": 80.0, "width": 33.33, "height": 10.0},
                "color": "#FF0000"
            })
        );
    }
}
