use std::path::Path;
use std::sync::Mutex;

use image::RgbImage;
use image::imageops::FilterType;
use tch::{CModule, Device, Kind, Tensor};
use thiserror::Error;

use super::ModelKind;

/// Square input edge fed to detector exports.
const DETECTOR_INPUT_SIZE: u32 = 640;
/// Square input edge fed to classifier exports.
const CLASSIFIER_INPUT_SIZE: u32 = 224;
/// Columns per detection row: x1, y1, x2, y2, confidence, class.
const DETECTION_ROW_LEN: usize = 6;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to load model: {0}")]
    Load(tch::TchError),
    #[error("model forward pass failed: {0}")]
    Forward(tch::TchError),
    #[error("unexpected model output: {0}")]
    BadOutput(String),
    #[error("class id {class_id} is outside the label table ({table_len} entries)")]
    LabelOutOfRange { class_id: i64, table_len: usize },
}

/// Raw model output, before the adapter resolves labels and validates
/// geometry. Detection rows are `[x1, y1, x2, y2, confidence, class]` in
/// pixel coordinates of the original image.
#[derive(Debug, Clone)]
pub enum RawOutput {
    Detections(Vec<[f32; 6]>),
    Scores(Vec<f32>),
}

/// Boundary to the opaque pretrained model. The production implementation
/// is [`TchBackend`]; tests substitute fakes.
pub trait Backend: Send + Sync {
    fn forward(&self, image: &RgbImage) -> Result<RawOutput, ModelError>;
}

/// TorchScript model executed through `tch`. The module is loaded once at
/// startup; `CModule` is not documented safe for concurrent forward calls,
/// so inference is serialized behind a mutex.
pub struct TchBackend {
    module: Mutex<CModule>,
    device: Device,
    kind: ModelKind,
    input_size: u32,
}

impl TchBackend {
    pub fn load(path: &Path, kind: ModelKind) -> Result<Self, ModelError> {
        let device = Device::cuda_if_available();
        let module = CModule::load_on_device(path, device).map_err(ModelError::Load)?;
        let input_size = match kind {
            ModelKind::Detector => DETECTOR_INPUT_SIZE,
            ModelKind::Classifier => CLASSIFIER_INPUT_SIZE,
        };
        Ok(Self {
            module: Mutex::new(module),
            device,
            kind,
            input_size,
        })
    }

    /// Resize to the model's square input and pack as an NCHW float tensor
    /// normalized to [0, 1].
    fn preprocess(&self, image: &RgbImage) -> Tensor {
        let size = self.input_size;
        let resized = image::imageops::resize(image, size, size, FilterType::Triangle);

        let plane = (size * size) as usize;
        let raw = resized.as_raw();
        let mut data = vec![0f32; 3 * plane];
        for idx in 0..plane {
            data[idx] = raw[idx * 3] as f32 / 255.0;
            data[plane + idx] = raw[idx * 3 + 1] as f32 / 255.0;
            data[2 * plane + idx] = raw[idx * 3 + 2] as f32 / 255.0;
        }

        Tensor::from_slice(&data)
            .view([1, 3, size as i64, size as i64])
            .to_device(self.device)
    }

    fn flatten(output: &Tensor) -> Vec<f32> {
        let flat = output.to_kind(Kind::Float).view([-1]);
        let len = flat.size()[0] as usize;
        let mut values = vec![0f32; len];
        flat.copy_data(&mut values, len);
        values
    }

    fn extract_detections(
        &self,
        output: &Tensor,
        image: &RgbImage,
    ) -> Result<Vec<[f32; 6]>, ModelError> {
        let dims = output.size();
        match dims.last() {
            Some(&last) if last as usize == DETECTION_ROW_LEN => {}
            _ => {
                return Err(ModelError::BadOutput(format!(
                    "expected detection rows of {} values, got tensor shape {:?}",
                    DETECTION_ROW_LEN, dims
                )));
            }
        }

        // Detector exports emit boxes in input space; scale back to the
        // original image.
        let scale_x = image.width() as f32 / self.input_size as f32;
        let scale_y = image.height() as f32 / self.input_size as f32;

        let values = Self::flatten(output);
        let rows = values
            .chunks_exact(DETECTION_ROW_LEN)
            .map(|row| {
                [
                    row[0] * scale_x,
                    row[1] * scale_y,
                    row[2] * scale_x,
                    row[3] * scale_y,
                    row[4],
                    row[5],
                ]
            })
            .collect();
        Ok(rows)
    }
}

impl Backend for TchBackend {
    fn forward(&self, image: &RgbImage) -> Result<RawOutput, ModelError> {
        let input = self.preprocess(image);
        let output = self
            .module
            .lock()
            .unwrap()
            .forward_ts(&[input])
            .map_err(ModelError::Forward)?;

        match self.kind {
            ModelKind::Detector => Ok(RawOutput::Detections(
                self.extract_detections(&output, image)?,
            )),
            ModelKind::Classifier => {
                let probabilities = output.softmax(-1, Kind::Float);
                Ok(RawOutput::Scores(Self::flatten(&probabilities)))
            }
        }
    }
}
