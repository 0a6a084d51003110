//! YOLOv3 のモデルをコントロールするモジュール

use std::collections::HashSet;
use std::path::Path;

use image::DynamicImage;
use log::{debug, info};

use crate::config::Config;
use crate::detection_result::ObjectDetection;
use crate::error::{Result, YoloError};
use crate::img_proc;
use crate::neural_net::{NeuralNet, Tensor};
use crate::nms;
use crate::postprocess;

/// ネットワークの入力層
pub const INPUT_LAYER: &str = "data";

/// YOLOv3 の 3 つの検出スケールに対応する出力層
pub const OUTPUT_LAYERS: [&str; 3] = ["yolo_82", "yolo_94", "yolo_106"];

/// YOLOv3 のモデルをコントロールする構造体
///
/// 推論エンジンは同時に 1 つの呼び出ししか受け付けないため、検出には `&mut self` が必要です。
/// 並列に処理したい場合はワーカーごとに検出器を作成してください。
pub struct YoloV3 {
    net: Box<dyn NeuralNet>,
    labels: Vec<String>,
    input_width: u32,
    input_height: u32,
    confidence_threshold: f32,
    nms_threshold: f32,
}

impl YoloV3 {
    /// 既定の設定で新しい `YoloV3` インスタンスを作成します。
    ///
    /// # Args
    /// * `weights_path` - 重みファイルのパス
    /// * `config_path` - ネットワーク構成ファイルのパス
    /// * `labels_path` - ラベルファイルのパス (1 行に 1 クラス)
    ///
    /// # Return
    /// * 新たな `YoloV3` インスタンス
    pub fn new<P, Q, R>(weights_path: P, config_path: Q, labels_path: R) -> Result<Self>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
        R: AsRef<Path>,
    {
        Self::with_config(weights_path, config_path, labels_path, Config::default())
    }

    /// 設定を指定して新しい `YoloV3` インスタンスを作成します。
    ///
    /// 重みファイル、構成ファイルの存在はエンジンを生成する前に確認します。
    ///
    /// # Args
    /// * `weights_path` - 重みファイルのパス
    /// * `config_path` - ネットワーク構成ファイルのパス
    /// * `labels_path` - ラベルファイルのパス
    /// * `config` - 検出器の設定
    ///
    /// # Return
    /// * 新たな `YoloV3` インスタンス
    pub fn with_config<P, Q, R>(
        weights_path: P,
        config_path: Q,
        labels_path: R,
        config: Config,
    ) -> Result<Self>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
        R: AsRef<Path>,
    {
        let weights_path = weights_path.as_ref();
        let config_path = config_path.as_ref();

        if let Ok(false) = weights_path.try_exists() {
            return Err(YoloError::WeightsNotFound(weights_path.to_path_buf()));
        }
        if let Ok(false) = config_path.try_exists() {
            return Err(YoloError::ConfigNotFound(config_path.to_path_buf()));
        }

        let labels = read_labels(labels_path)?;
        let config = config.validate()?;

        info!(
            "loading net: weights={}, config={}",
            weights_path.display(),
            config_path.display()
        );
        let mut net = (config.new_net)(weights_path, config_path).map_err(YoloError::Engine)?;
        net.set_preferable_backend(config.backend)
            .map_err(YoloError::BackendRejected)?;
        net.set_preferable_target(config.target)
            .map_err(YoloError::TargetRejected)?;
        info!(
            "net ready: input={}x{}, backend={:?}, target={:?}, {} labels",
            config.input_width,
            config.input_height,
            config.backend,
            config.target,
            labels.len()
        );

        Ok(Self {
            net,
            labels,
            input_width: config.input_width,
            input_height: config.input_height,
            confidence_threshold: config.confidence_threshold,
            nms_threshold: config.nms_threshold,
        })
    }

    /// フレームから物体を検出します。
    pub fn detections(&mut self, frame: &DynamicImage) -> Result<Vec<ObjectDetection>> {
        self.detections_with_filter(frame, &HashSet::new())
    }

    /// フレームから物体を検出します。`filter` に含まれるクラス名の検出は除外します。
    ///
    /// # Args
    /// * `frame` - 入力フレーム
    /// * `filter` - 除外するクラス名
    ///
    /// # Return
    /// * 物体検出結果。テンソルの解釈に失敗した場合は検出結果を返さずにエラー
    pub fn detections_with_filter(
        &mut self,
        frame: &DynamicImage,
        filter: &HashSet<String>,
    ) -> Result<Vec<ObjectDetection>> {
        let blob = img_proc::blob_from_image(frame, self.input_width, self.input_height);
        self.net
            .set_input(&blob, INPUT_LAYER)
            .map_err(YoloError::Engine)?;

        let outputs = self
            .net
            .forward_layers(&OUTPUT_LAYERS)
            .map_err(YoloError::Engine)?;

        let detections = self.process_outputs(frame.width(), frame.height(), &outputs, filter)?;
        debug!("{} detections", detections.len());
        Ok(detections)
    }

    /// 出力テンソルをデコードし、NMS を適用します。
    fn process_outputs(
        &self,
        frame_width: u32,
        frame_height: u32,
        outputs: &[Tensor],
        filter: &HashSet<String>,
    ) -> Result<Vec<ObjectDetection>> {
        let candidates = postprocess::decode_outputs(
            outputs,
            frame_width,
            frame_height,
            &self.labels,
            self.confidence_threshold,
            filter,
        )?;
        Ok(nms::suppress(
            candidates,
            self.confidence_threshold,
            self.nms_threshold,
        ))
    }

    /// エンジンを解放します。解放後の検出器は使えません。
    pub fn close(mut self) -> Result<()> {
        info!("closing net");
        self.net.close().map_err(YoloError::Engine)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// (幅, 高さ)
    pub fn input_size(&self) -> (u32, u32) {
        (self.input_width, self.input_height)
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    pub fn nms_threshold(&self) -> f32 {
        self.nms_threshold
    }
}

/// ラベルファイルを読み込みます。
///
/// 改行で分割し、末尾の空要素も含めてそのまま返します。行番号がクラスIDになります。
pub fn read_labels<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let path = path.as_ref();
    let content = std::fs::read(path).map_err(|source| YoloError::LabelRead {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(String::from_utf8_lossy(&content)
        .split('\n')
        .map(String::from)
        .collect())
}
