//! 検出器のエラー型を定義するモジュール

use std::path::PathBuf;

use thiserror::Error;

use crate::neural_net::EngineError;

/// 検出器の構築・推論・後処理で発生するエラー
#[derive(Debug, Error)]
pub enum YoloError {
    #[error("path to net weights not found: {0}")]
    WeightsNotFound(PathBuf),
    #[error("path to net config not found: {0}")]
    ConfigNotFound(PathBuf),
    #[error("unable to read labels from {path}: {source}")]
    LabelRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    BackendRejected(#[source] EngineError),
    #[error("{0}")]
    TargetRejected(#[source] EngineError),
    #[error("inference engine error: {0}")]
    Engine(#[source] EngineError),
    #[error("unable to decode output tensor {index}: {reason}")]
    TensorDecode { index: usize, reason: String },
    #[error("class id {class_id} out of range for {labels} labels")]
    ClassOutOfRange { class_id: usize, labels: usize },
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("unable to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, YoloError>;
