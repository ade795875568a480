mod backend;
pub mod labels;

use std::str::FromStr;

use image::RgbImage;
use serde::Serialize;

pub use backend::{Backend, ModelError, RawOutput, TchBackend};

/// How many classification scores a response carries.
pub const TOP_K: usize = 3;

/// Model family, selected at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Detector,
    Classifier,
}

impl FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "detector" => Ok(ModelKind::Detector),
            "classifier" => Ok(ModelKind::Classifier),
            other => Err(format!(
                "unknown model kind '{}', expected 'detector' or 'classifier'",
                other
            )),
        }
    }
}

/// One predicted object instance.
#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    pub class_id: u32,
    pub class_name: String,
    pub confidence: f32,
    /// `[x1, y1, x2, y2]` in pixel coordinates, `x1 < x2`, `y1 < y2`.
    pub bbox: [f32; 4],
}

/// One entry of a classifier's top-K output.
#[derive(Debug, Clone, Serialize)]
pub struct ClassificationScore {
    pub class_name: String,
    pub probability: f32,
}

/// The predictions of a single request, serialized untagged as the
/// `predictions` array of the response body.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum InferenceResult {
    Detections(Vec<Detection>),
    Scores(Vec<ClassificationScore>),
}

/// Wraps the opaque model behind a uniform `infer` call and translates its
/// raw output into the service's prediction records.
pub struct ModelAdapter {
    backend: Box<dyn Backend>,
    labels: Vec<String>,
}

impl ModelAdapter {
    pub fn new(backend: Box<dyn Backend>, labels: Vec<String>) -> Self {
        Self { backend, labels }
    }

    /// Stateless with respect to call history; an empty detection list is a
    /// normal, successful result.
    pub fn infer(&self, image: &RgbImage) -> Result<InferenceResult, ModelError> {
        match self.backend.forward(image)? {
            RawOutput::Detections(rows) => Ok(InferenceResult::Detections(
                self.map_detections(rows, image.width(), image.height())?,
            )),
            RawOutput::Scores(probabilities) => {
                Ok(InferenceResult::Scores(self.top_scores(&probabilities)?))
            }
        }
    }

    fn resolve_label(&self, class_id: i64) -> Result<&str, ModelError> {
        if class_id < 0 || class_id as usize >= self.labels.len() {
            // An id outside the fixed table is an adapter bug, never a
            // user error.
            return Err(ModelError::LabelOutOfRange {
                class_id,
                table_len: self.labels.len(),
            });
        }
        Ok(&self.labels[class_id as usize])
    }

    fn map_detections(
        &self,
        rows: Vec<[f32; 6]>,
        width: u32,
        height: u32,
    ) -> Result<Vec<Detection>, ModelError> {
        let (w, h) = (width as f32, height as f32);
        let mut detections = Vec::with_capacity(rows.len());

        for row in rows {
            let class_id = row[5].round() as i64;
            let class_name = self.resolve_label(class_id)?.to_string();

            let x1 = row[0].clamp(0.0, w);
            let y1 = row[1].clamp(0.0, h);
            let x2 = row[2].clamp(0.0, w);
            let y2 = row[3].clamp(0.0, h);
            // Boxes that collapse after clamping carry no renderable area.
            if x1 >= x2 || y1 >= y2 {
                continue;
            }

            detections.push(Detection {
                class_id: class_id as u32,
                class_name,
                confidence: row[4].clamp(0.0, 1.0),
                bbox: [x1, y1, x2, y2],
            });
        }
        Ok(detections)
    }

    /// Top-K scores, descending by probability. Equal probabilities keep
    /// label-table order (ascending class index).
    fn top_scores(&self, probabilities: &[f32]) -> Result<Vec<ClassificationScore>, ModelError> {
        let mut indexed: Vec<(usize, f32)> = probabilities
            .iter()
            .copied()
            .enumerate()
            .collect();
        indexed.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        indexed
            .into_iter()
            .take(TOP_K)
            .map(|(class_id, probability)| {
                Ok(ClassificationScore {
                    class_name: self.resolve_label(class_id as i64)?.to_string(),
                    probability: probability.clamp(0.0, 1.0),
                })
            })
            .collect()
    }
}
