use std::env;
use std::path::PathBuf;

use thiserror::Error;

use crate::model::ModelKind;

const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:5173";
const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Service configuration, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the TorchScript model file.
    pub model_path: PathBuf,
    pub model_kind: ModelKind,
    /// Optional newline-delimited label table; COCO-80 otherwise.
    pub labels_path: Option<PathBuf>,
    /// Optional TTF override for the annotator.
    pub font_path: Option<PathBuf>,
    /// The single origin allowed by the CORS policy.
    pub allowed_origin: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let model_path = env::var("MODEL_PATH")
            .map(PathBuf::from)
            .map_err(|_| ConfigError::Missing("MODEL_PATH"))?;

        let model_kind = match env::var("MODEL_KIND") {
            Ok(value) => value
                .parse::<ModelKind>()
                .map_err(|reason| ConfigError::Invalid {
                    name: "MODEL_KIND",
                    reason,
                })?,
            Err(_) => ModelKind::Detector,
        };

        let port = match env::var("PORT") {
            Ok(value) => value.parse::<u16>().map_err(|e| ConfigError::Invalid {
                name: "PORT",
                reason: e.to_string(),
            })?,
            Err(_) => DEFAULT_PORT,
        };

        Ok(Self {
            model_path,
            model_kind,
            labels_path: env::var("LABELS_PATH").ok().map(PathBuf::from),
            font_path: env::var("FONT_PATH").ok().map(PathBuf::from),
            allowed_origin: env::var("ALLOWED_ORIGIN")
                .unwrap_or_else(|_| DEFAULT_ALLOWED_ORIGIN.to_string()),
            port,
        })
    }
}
