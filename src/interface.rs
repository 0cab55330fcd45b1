// src/interface.rs
//
// Seams to the collaborators that live outside the tracking core:
// the object detector (bounding boxes per frame) and the color
// classifier (bbox + frame -> color label with confidence).

use crate::types::{BoundingBox, ColorObservation, CubeColor, FrameInput};
use anyhow::Result;
use image::RgbImage;

/// One bounding box from the object detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    pub bbox: BoundingBox,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub color: CubeColor,
    /// In [0, 1]
    pub confidence: f32,
}

impl Classification {
    pub fn unknown(confidence: f32) -> Self {
        Self {
            color: CubeColor::Unknown,
            confidence,
        }
    }
}

pub trait ObjectDetector {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<RawDetection>>;
}

pub trait ColorClassifier {
    fn classify(&self, frame: &RgbImage, bbox: &BoundingBox) -> Classification;
}

/// Run detector and classifier over one frame and package the result for the
/// tracking core. Boxes at or below `min_detection_confidence` are not
/// classified. A detector failure ends the frame loop; it is the caller's
/// to handle.
pub fn classify_frame<D, C>(
    detector: &mut D,
    classifier: &C,
    frame: &RgbImage,
    timestamp_ms: f64,
    min_detection_confidence: f32,
) -> Result<FrameInput>
where
    D: ObjectDetector + ?Sized,
    C: ColorClassifier + ?Sized,
{
    let observations = detector
        .detect(frame)?
        .into_iter()
        .filter(|det| det.confidence > min_detection_confidence)
        .map(|det| {
            let c = classifier.classify(frame, &det.bbox);
            ColorObservation::new(c.color, c.confidence, det.bbox)
        })
        .collect();
    Ok(FrameInput::new(timestamp_ms, observations))
}
