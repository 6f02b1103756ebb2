use std::{error::Error as _, path::PathBuf};

use log::{debug, error, info, warn};
use thiserror::Error;

mod model;
mod postprocess;
mod preprocess;
mod record;

pub use model::{InferenceParams, YoloModel};
pub use record::{
    class_color, normalize, round_to, BoundingBox, ClassFilter, ClassNames, Detection,
    RawDetection, DEFAULT_COLOR, UNKNOWN_CLASS,
};

#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("model file not found at '{0}'")]
    ModelNotFound(PathBuf),
    #[error("image file not found at '{0}'")]
    ImageNotFound(PathBuf),
    #[error("failed to load image: {0}")]
    Image(#[from] image::ImageError),
    #[error("{0}")]
    Runtime(#[from] ort::Error),
    #[error("{0}")]
    UnexpectedOutput(String),
    #[error("image size {0} is outside 1..={max}", max = preprocess::MAX_IMAGE_SIZE)]
    InvalidImageSize(u32),
}

impl DetectionError {
    pub fn kind(&self) -> &'static str {
        match self {
            DetectionError::ModelNotFound(_) => "ModelNotFound",
            DetectionError::ImageNotFound(_) => "ImageNotFound",
            DetectionError::Image(_) => "ImageError",
            DetectionError::Runtime(_) => "RuntimeError",
            DetectionError::UnexpectedOutput(_) => "UnexpectedOutput",
            DetectionError::InvalidImageSize(_) => "InvalidImageSize",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectionRequest {
    pub image_path: PathBuf,
    pub model_path: PathBuf,
    pub conf_threshold: f32,
    pub iou_threshold: f32,
    pub image_size: u32,
    pub target_classes: Vec<String>,
}

impl DetectionRequest {
    pub fn new(image_path: impl Into<PathBuf>, model_path: impl Into<PathBuf>) -> Self {
        Self {
            image_path: image_path.into(),
            model_path: model_path.into(),
            conf_threshold: 0.25,
            iou_threshold: 0.45,
            image_size: 640,
            target_classes: vec![],
        }
    }

    fn params(&self) -> Result<InferenceParams, DetectionError> {
        let image_size = preprocess::stride_aligned(self.image_size)
            .ok_or(DetectionError::InvalidImageSize(self.image_size))?;
        if image_size != self.image_size {
            warn!(
                "image size {} is not a multiple of {}, using {image_size}",
                self.image_size,
                preprocess::STRIDE
            );
        }
        Ok(InferenceParams {
            conf_threshold: self.conf_threshold,
            iou_threshold: self.iou_threshold,
            image_size,
        })
    }
}

/// Runs one inference pass. The model is loaded fresh on every call.
pub fn run_detection(request: &DetectionRequest) -> Result<Vec<Detection>, DetectionError> {
    if !request.model_path.is_file() {
        return Err(DetectionError::ModelNotFound(request.model_path.clone()));
    }
    let params = request.params()?;
    info!("loading model from {}", request.model_path.display());
    let mut model = YoloModel::load(&request.model_path)?;

    if !request.image_path.is_file() {
        return Err(DetectionError::ImageNotFound(request.image_path.clone()));
    }
    info!("running prediction on {}", request.image_path.display());
    let image = image::open(&request.image_path)?.to_rgb8();
    let raw = model.infer(&image, &params)?;
    debug!("model produced {} detections", raw.len());

    Ok(normalize(
        &raw,
        model.names(),
        &ClassFilter::new(&request.target_classes),
    ))
}

/// Collapses a failed detection into an empty list after logging it.
pub fn detections_or_empty(result: Result<Vec<Detection>, DetectionError>) -> Vec<Detection> {
    match result {
        Ok(detections) => detections,
        Err(e) => {
            for line in error_trace(&e) {
                error!("{line}");
            }
            vec![]
        }
    }
}

/// The error's kind and message followed by each underlying cause.
pub fn error_trace(e: &DetectionError) -> Vec<String> {
    let mut lines = vec![format!("detection failed: {} - {e}", e.kind())];
    let mut source = e.source();
    while let Some(cause) = source {
        lines.push(format!("caused by: {cause}"));
        source = cause.source();
    }
    lines
}
