use std::path::Path;

use image::RgbImage;
use log::{debug, warn};
use ndarray::{ArrayViewD, Axis, Ix2, IxDyn};
use ort::{session::Session, value::Tensor};

use super::{
    postprocess::{decode_anchors, decode_end_to_end, non_max_suppression, OutputLayout},
    preprocess::letterbox,
    record::{ClassNames, RawDetection},
    DetectionError,
};

#[derive(Debug, Clone, Copy)]
pub struct InferenceParams {
    pub conf_threshold: f32,
    pub iou_threshold: f32,
    pub image_size: u32,
}

/// An ultralytics YOLO detector exported to ONNX.
pub struct YoloModel {
    session: Session,
    names: ClassNames,
}

impl YoloModel {
    pub fn load(path: &Path) -> Result<Self, DetectionError> {
        let session = Session::builder()?
            .with_intra_threads(4)?
            .commit_from_file(path)?;
        let names = read_names(&session);
        debug!("model declares {} class names", names.len());
        Ok(Self { session, names })
    }

    pub fn names(&self) -> &ClassNames {
        &self.names
    }

    /// Runs one forward pass. Boxes come back in source-image pixels, in the
    /// model's output order.
    pub fn infer(
        &mut self,
        image: &RgbImage,
        params: &InferenceParams,
    ) -> Result<Vec<RawDetection>, DetectionError> {
        let known_classes = self.names.len();
        let (input, geometry) = letterbox(image, params.image_size);
        let side = params.image_size as i64;
        let (input, _) = input.into_raw_vec_and_offset();
        let tensor = Tensor::from_array((vec![1, 3, side, side], input))?;

        let outputs = self.session.run(ort::inputs![tensor])?;
        let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
        let dims: Vec<usize> = shape.iter().map(|&x| x as usize).collect();
        let layout =
            OutputLayout::detect(&dims, known_classes).map_err(DetectionError::UnexpectedOutput)?;
        debug!("output shape {dims:?} read as {layout:?}");

        let view = ArrayViewD::from_shape(IxDyn(&dims), data)
            .map_err(|e| DetectionError::UnexpectedOutput(e.to_string()))?;
        let view = view
            .index_axis(Axis(0), 0)
            .into_dimensionality::<Ix2>()
            .map_err(|e| DetectionError::UnexpectedOutput(e.to_string()))?;

        let candidates = match layout {
            OutputLayout::Anchors { classes } => {
                if known_classes > 0 && classes != known_classes {
                    warn!("model output has {classes} classes but metadata names {known_classes}");
                }
                non_max_suppression(
                    decode_anchors(view, params.conf_threshold),
                    params.iou_threshold,
                )
            }
            OutputLayout::EndToEnd => decode_end_to_end(view, params.conf_threshold),
        };

        Ok(candidates
            .into_iter()
            .map(|candidate| {
                let (cx, cy, width, height) = geometry.restore(candidate.xyxy);
                RawDetection {
                    class_id: candidate.class_id,
                    confidence: candidate.confidence,
                    cx,
                    cy,
                    width,
                    height,
                }
            })
            .collect())
    }
}

fn read_names(session: &Session) -> ClassNames {
    let metadata = match session.metadata() {
        Ok(metadata) => metadata,
        Err(e) => {
            warn!("failed to read model metadata: {e}");
            return ClassNames::default();
        }
    };
    match metadata.custom("names") {
        Ok(Some(raw)) => ClassNames::parse(&raw),
        Ok(None) => {
            warn!("model has no class names metadata, classes will be reported as unknown");
            ClassNames::default()
        }
        Err(e) => {
            warn!("failed to read class names metadata: {e}");
            ClassNames::default()
        }
    }
}
