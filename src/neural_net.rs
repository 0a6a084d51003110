//! 推論エンジンを抽象化するモジュール
//!
//! 検出器は畳み込み演算そのものを持たず、[`NeuralNet`] を実装したエンジンに
//! 入力ブロブを渡して出力テンソルを受け取るだけです。
//! 実機では OpenCV DNN (`opencv-engine` feature)、テストでは [`crate::stub_net::StubNet`] を使います。

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::config::{Backend, Target};

/// 推論エンジンが返すエラー
///
/// エンジン側のメッセージはそのまま保持され、検出器のエラーとして呼び出し元に返されます。
#[derive(Debug, Error)]
#[error("{message}")]
pub struct EngineError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// 推論エンジンが満たすべきインターフェース
pub trait NeuralNet: Send {
    /// 計算ライブラリ (バックエンド) を選択します。
    fn set_preferable_backend(&mut self, backend: Backend) -> Result<(), EngineError>;

    /// 実行デバイス (ターゲット) を選択します。
    fn set_preferable_target(&mut self, target: Target) -> Result<(), EngineError>;

    /// 名前付き入力層にブロブを設定します。
    fn set_input(&mut self, blob: &Blob, name: &str) -> Result<(), EngineError>;

    /// 指定した出力層まで順伝播し、各層の出力を名前の順に返します。
    fn forward_layers(&mut self, names: &[&str]) -> Result<Vec<Tensor>, EngineError>;

    /// エンジンのネイティブリソースを解放します。
    fn close(&mut self) -> Result<(), EngineError>;
}

/// 重みファイルと構成ファイルのパスからエンジンを生成する関数
pub type NetFactory =
    Arc<dyn Fn(&Path, &Path) -> Result<Box<dyn NeuralNet>, EngineError> + Send + Sync>;

/// テンソル要素の型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    F32,
    F64,
    I32,
    I16,
    U8,
    /// 変換できないエンジン固有の型 (OpenCV の depth など)
    Other(i32),
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementType::F32 => "f32",
            ElementType::F64 => "f64",
            ElementType::I32 => "i32",
            ElementType::I16 => "i16",
            ElementType::U8 => "u8",
            ElementType::Other(code) => return write!(f, "unsupported type {}", code),
        };
        f.write_str(name)
    }
}

/// テンソルの要素バッファ
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    F32(Vec<f32>),
    F64(Vec<f64>),
    I32(Vec<i32>),
    I16(Vec<i16>),
    U8(Vec<u8>),
    /// 要素を読み出せないバッファ。型コードと要素数だけを保持します。
    Other { code: i32, len: usize },
}

impl TensorData {
    pub fn element_type(&self) -> ElementType {
        match self {
            TensorData::F32(_) => ElementType::F32,
            TensorData::F64(_) => ElementType::F64,
            TensorData::I32(_) => ElementType::I32,
            TensorData::I16(_) => ElementType::I16,
            TensorData::U8(_) => ElementType::U8,
            TensorData::Other { code, .. } => ElementType::Other(*code),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TensorData::F32(v) => v.len(),
            TensorData::F64(v) => v.len(),
            TensorData::I32(v) => v.len(),
            TensorData::I16(v) => v.len(),
            TensorData::U8(v) => v.len(),
            TensorData::Other { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// エンジンが出力する 2 次元テンソル
///
/// 1 行が 1 候補に対応し、`[cx, cy, w, h, objectness, score_0, score_1, ...]` の順に並びます。
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    rows: usize,
    cols: usize,
    data: TensorData,
}

impl Tensor {
    pub fn new(rows: usize, cols: usize, data: TensorData) -> Self {
        Self { rows, cols, data }
    }

    /// f32 の行優先バッファからテンソルを作成します。
    pub fn from_f32(rows: usize, cols: usize, data: Vec<f32>) -> Self {
        Self::new(rows, cols, TensorData::F32(data))
    }

    /// ゼロ埋めされた f32 テンソルを作成します。
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self::from_f32(rows, cols, vec![0.; rows * cols])
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// バッファ内の要素数
    pub fn total(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn element_type(&self) -> ElementType {
        self.data.element_type()
    }

    /// 要素が f32 の場合のみフラットなスライスを返します。
    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.data {
            TensorData::F32(v) => Some(v),
            _ => None,
        }
    }

    /// f32 テンソルの (row, col) に値を書き込みます。範囲外や型違いの場合は false を返します。
    pub fn set_f32_at(&mut self, row: usize, col: usize, value: f32) -> bool {
        if row >= self.rows || col >= self.cols {
            return false;
        }
        match &mut self.data {
            TensorData::F32(v) => match v.get_mut(row * self.cols + col) {
                Some(slot) => {
                    *slot = value;
                    true
                }
                None => false,
            },
            _ => false,
        }
    }
}

/// ネットワーク入力用に正規化された NCHW 形式 (N = 1, C = 3) のブロブ
#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    data: Vec<f32>,
    width: u32,
    height: u32,
}

impl Blob {
    pub const CHANNELS: usize = 3;

    pub(crate) fn new(data: Vec<f32>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// `[N, C, H, W]`
    pub fn shape(&self) -> [usize; 4] {
        [1, Self::CHANNELS, self.height as usize, self.width as usize]
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// チャネル `ch` のプレーン
    pub fn channel(&self, ch: usize) -> &[f32] {
        let plane = self.width as usize * self.height as usize;
        &self.data[ch * plane..(ch + 1) * plane]
    }
}
