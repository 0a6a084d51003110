//! 検出器の設定を扱うモジュール

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::{Result, YoloError};
use crate::neural_net::{EngineError, NetFactory, NeuralNet};

pub const DEFAULT_INPUT_WIDTH: u32 = 416;
pub const DEFAULT_INPUT_HEIGHT: u32 = 416;
pub const DEFAULT_CONF_THRESHOLD: f32 = 0.5;
pub const DEFAULT_NMS_THRESHOLD: f32 = 0.4;

/// 推論に使う計算ライブラリ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Default,
    Halide,
    InferenceEngine,
    OpenCv,
    Vulkan,
    Cuda,
}

impl Backend {
    /// エンジン側の数値 ID
    pub fn id(self) -> i32 {
        match self {
            Backend::Default => 0,
            Backend::Halide => 1,
            Backend::InferenceEngine => 2,
            Backend::OpenCv => 3,
            Backend::Vulkan => 4,
            Backend::Cuda => 5,
        }
    }
}

/// 推論を実行するデバイス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    #[default]
    Cpu,
    OpenCl,
    OpenClFp16,
    Myriad,
    Vulkan,
    Fpga,
    Cuda,
    CudaFp16,
}

impl Target {
    /// エンジン側の数値 ID
    pub fn id(self) -> i32 {
        match self {
            Target::Cpu => 0,
            Target::OpenCl => 1,
            Target::OpenClFp16 => 2,
            Target::Myriad => 3,
            Target::Vulkan => 4,
            Target::Fpga => 5,
            Target::Cuda => 6,
            Target::CudaFp16 => 7,
        }
    }
}

/// 検出器の設定
///
/// TOML から読み込むこともできます。`new_net` は読み込み対象外で、常に既定のエンジンになります。
///
/// ```toml
/// input_width = 608
/// input_height = 608
/// confidence_threshold = 0.6
/// backend = "cuda"
/// target = "cuda_fp16"
/// ```
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// ネットワーク入力の幅 (0 の場合は既定値)
    pub input_width: u32,
    /// ネットワーク入力の高さ (0 の場合は既定値)
    pub input_height: u32,
    /// この値を超えるスコアの候補だけを検出とみなす
    pub confidence_threshold: f32,
    /// NMS で重なりとみなす IoU の閾値
    pub nms_threshold: f32,
    pub backend: Backend,
    pub target: Target,
    /// エンジンを生成する関数。テストではスタブに差し替えます。
    #[serde(skip, default = "default_net_factory")]
    pub new_net: NetFactory,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_width: DEFAULT_INPUT_WIDTH,
            input_height: DEFAULT_INPUT_HEIGHT,
            confidence_threshold: DEFAULT_CONF_THRESHOLD,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
            backend: Backend::default(),
            target: Target::default(),
            new_net: default_net_factory(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("input_width", &self.input_width)
            .field("input_height", &self.input_height)
            .field("confidence_threshold", &self.confidence_threshold)
            .field("nms_threshold", &self.nms_threshold)
            .field("backend", &self.backend)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// TOML 文字列から設定を読み込みます。記述のない項目は既定値になります。
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// TOML ファイルから設定を読み込みます。
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| YoloError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// エンジンの生成関数を差し替えます。
    pub fn with_new_net<F>(mut self, f: F) -> Self
    where
        F: Fn(&Path, &Path) -> std::result::Result<Box<dyn NeuralNet>, EngineError>
            + Send
            + Sync
            + 'static,
    {
        self.new_net = Arc::new(f);
        self
    }

    /// 未設定の入力サイズを既定値で埋め、閾値を検証します。
    pub(crate) fn validate(mut self) -> Result<Self> {
        if self.input_width == 0 {
            self.input_width = DEFAULT_INPUT_WIDTH;
        }
        if self.input_height == 0 {
            self.input_height = DEFAULT_INPUT_HEIGHT;
        }
        if !self.confidence_threshold.is_finite() {
            return Err(YoloError::InvalidConfig(format!(
                "confidence threshold must be finite, got {}",
                self.confidence_threshold
            )));
        }
        if !self.nms_threshold.is_finite() {
            return Err(YoloError::InvalidConfig(format!(
                "nms threshold must be finite, got {}",
                self.nms_threshold
            )));
        }
        Ok(self)
    }
}

#[cfg(feature = "opencv-engine")]
fn default_net_factory() -> NetFactory {
    Arc::new(
        |weights: &Path, config: &Path| -> std::result::Result<Box<dyn NeuralNet>, EngineError> {
            let net = crate::opencv_net::read_net(weights, config)?;
            Ok(Box::new(net))
        },
    )
}

#[cfg(not(feature = "opencv-engine"))]
fn default_net_factory() -> NetFactory {
    Arc::new(
        |_: &Path, _: &Path| -> std::result::Result<Box<dyn NeuralNet>, EngineError> {
            Err(EngineError::new(
                "no inference engine compiled in, enable the `opencv-engine` feature",
            ))
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_constants() {
        let c = Config::default();
        assert_eq!(c.input_width, 416);
        assert_eq!(c.input_height, 416);
        assert_eq!(c.confidence_threshold, 0.5);
        assert_eq!(c.nms_threshold, 0.4);
        assert_eq!(c.backend, Backend::Default);
        assert_eq!(c.target, Target::Cpu);
    }

    #[test]
    fn validate_fills_zero_input_size() {
        let c = Config {
            input_width: 0,
            input_height: 0,
            confidence_threshold: 0.,
            nms_threshold: 0.,
            ..Config::default()
        }
        .validate()
        .unwrap();
        assert_eq!((c.input_width, c.input_height), (416, 416));
        assert_eq!(c.confidence_threshold, 0.);
        assert_eq!(c.nms_threshold, 0.);
    }

    #[test]
    fn validate_rejects_nan_threshold() {
        let c = Config {
            nms_threshold: f32::NAN,
            ..Config::default()
        };
        assert!(matches!(c.validate(), Err(YoloError::InvalidConfig(_))));
    }

    #[test]
    fn toml_overrides_only_given_fields() {
        let c = Config::from_toml_str(
            r#"
            input_width = 608
            confidence_threshold = 0.6
            backend = "cuda"
            target = "cuda_fp16"
            "#,
        )
        .unwrap();
        assert_eq!(c.input_width, 608);
        assert_eq!(c.input_height, DEFAULT_INPUT_HEIGHT);
        assert_eq!(c.confidence_threshold, 0.6);
        assert_eq!(c.nms_threshold, DEFAULT_NMS_THRESHOLD);
        assert_eq!(c.backend, Backend::Cuda);
        assert_eq!(c.target, Target::CudaFp16);
    }

    #[test]
    fn toml_with_unknown_backend_fails() {
        let r = Config::from_toml_str(r#"backend = "tpu""#);
        assert!(matches!(r, Err(YoloError::ConfigParse(_))));
    }

    #[test]
    fn load_reads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("yolo.toml");
        std::fs::write(
            &path,
            "input_height = 320\nnms_threshold = 0.3\ntarget = \"open_cl\"\n",
        )
        .unwrap();

        let c = Config::load(&path).unwrap();
        assert_eq!(c.input_width, DEFAULT_INPUT_WIDTH);
        assert_eq!(c.input_height, 320);
        assert_eq!(c.nms_threshold, 0.3);
        assert_eq!(c.target, Target::OpenCl);
    }

    #[test]
    fn load_missing_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        match Config::load(&path) {
            Err(YoloError::ConfigRead { path: p, source }) => {
                assert_eq!(p, path);
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn load_reports_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "input_width = \"wide\"").unwrap();
        assert!(matches!(Config::load(&path), Err(YoloError::ConfigParse(_))));
    }

    #[test]
    fn backend_and_target_ids() {
        assert_eq!(Backend::Cuda.id(), 5);
        assert_eq!(Target::Cuda.id(), 6);
        assert_eq!(Target::CudaFp16.id(), 7);
    }
}
