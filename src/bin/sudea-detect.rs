use std::path::PathBuf;

use clap::Parser;
use log::error;
use sudea_agent::detect::{detections_or_empty, run_detection, DetectionRequest};

/// Detects objects in an image with a YOLO ONNX model and prints them as JSON
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Image to process
    #[clap(long = "image_path")]
    image_path: PathBuf,
    /// ONNX model exported from ultralytics
    #[clap(long = "model_path")]
    model_path: PathBuf,
    /// Confidence threshold (0.0 to 1.0)
    #[clap(long = "conf_threshold", default_value_t = 0.25)]
    conf_threshold: f32,
    /// IoU threshold for NMS (0.0 to 1.0)
    #[clap(long = "iou_threshold", default_value_t = 0.45)]
    iou_threshold: f32,
    /// Inference image size
    #[clap(long = "image_size", default_value_t = 640)]
    image_size: u32,
    /// Only report these classes (e.g. fire smoke), all classes if omitted
    #[clap(long = "target_classes", num_args = 0..)]
    target_classes: Vec<String>,
}

impl From<Args> for DetectionRequest {
    fn from(args: Args) -> Self {
        DetectionRequest {
            image_path: args.image_path,
            model_path: args.model_path,
            conf_threshold: args.conf_threshold,
            iou_threshold: args.iou_threshold,
            image_size: args.image_size,
            target_classes: args.target_classes,
        }
    }
}

fn main() {
    let request: DetectionRequest = Args::parse().into();

    env_logger::Builder::new()
        .parse_env(env_logger::Env::default().default_filter_or("info"))
        .init();

    let detections = detections_or_empty(run_detection(&request));
    match serde_json::to_string_pretty(&detections) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            error!("failed to encode detections: {e}");
            println!("[]");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_use_snake_case_names_and_defaults() {
        let args = Args::try_parse_from([
            "sudea-detect",
            "--image_path",
            "frame.jpg",
            "--model_path",
            "fire.onnx",
        ])
        .unwrap();
        let request = DetectionRequest::from(args);
        assert_eq!(request.image_path, PathBuf::from("frame.jpg"));
        assert_eq!(request.model_path, PathBuf::from("fire.onnx"));
        assert_eq!(request.conf_threshold, 0.25);
        assert_eq!(request.iou_threshold, 0.45);
        assert_eq!(request.image_size, 640);
        assert!(request.target_classes.is_empty());
    }

    #[test]
    fn target_classes_take_many_values() {
        let args = Args::try_parse_from([
            "sudea-detect",
            "--image_path",
            "frame.jpg",
            "--model_path",
            "fire.onnx",
            "--target_classes",
            "fire",
            "smoke",
            "--conf_threshold",
            "0.5",
        ])
        .unwrap();
        assert_eq!(args.target_classes, vec!["fire", "smoke"]);
        assert_eq!(args.conf_threshold, 0.5);
    }

    #[test]
    fn paths_are_required() {
        assert!(Args::try_parse_from(["sudea-detect", "--image_path", "frame.jpg"]).is_err());
    }
}
