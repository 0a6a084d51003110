//! OpenCV DNN モジュールを使った推論エンジン

use std::path::Path;

use log::debug;
use opencv::core::{self, Mat, Scalar, Vector};
use opencv::dnn;
use opencv::prelude::*;

use crate::config::{Backend, Target};
use crate::neural_net::{Blob, EngineError, NeuralNet, Tensor, TensorData};

impl From<opencv::Error> for EngineError {
    fn from(e: opencv::Error) -> Self {
        EngineError::with_source(e.message.clone(), e)
    }
}

/// OpenCV の `dnn::Net` をラップしたエンジン
pub struct OpencvNet {
    net: Option<dnn::Net>,
}

/// Darknet 形式の重みと構成ファイルからネットワークを読み込みます。
///
/// # Args
/// * `weights_path` - 重みファイルのパス
/// * `config_path` - 構成ファイルのパス
///
/// # Return
/// * 読み込んだエンジン
pub fn read_net(weights_path: &Path, config_path: &Path) -> Result<OpencvNet, EngineError> {
    let net = dnn::read_net(path_str(weights_path)?, path_str(config_path)?, "")?;
    if net.empty()? {
        return Err(EngineError::new(format!(
            "unable to read net from {}",
            weights_path.display()
        )));
    }
    Ok(OpencvNet { net: Some(net) })
}

fn path_str(path: &Path) -> Result<&str, EngineError> {
    path.to_str()
        .ok_or_else(|| EngineError::new(format!("non UTF-8 path: {}", path.display())))
}

impl OpencvNet {
    fn net(&mut self) -> Result<&mut dnn::Net, EngineError> {
        self.net
            .as_mut()
            .ok_or_else(|| EngineError::new("net is closed"))
    }
}

impl NeuralNet for OpencvNet {
    fn set_preferable_backend(&mut self, backend: Backend) -> Result<(), EngineError> {
        self.net()?.set_preferable_backend(backend.id())?;
        Ok(())
    }

    fn set_preferable_target(&mut self, target: Target) -> Result<(), EngineError> {
        self.net()?.set_preferable_target(target.id())?;
        Ok(())
    }

    fn set_input(&mut self, blob: &Blob, name: &str) -> Result<(), EngineError> {
        let sizes = blob.shape().map(|d| d as i32);
        let mut mat = Mat::new_nd_with_default(&sizes, core::CV_32F, Scalar::all(0.))?;
        mat.data_typed_mut::<f32>()?.copy_from_slice(blob.data());
        self.net()?.set_input(&mat, name, 1.0, Scalar::default())?;
        Ok(())
    }

    fn forward_layers(&mut self, names: &[&str]) -> Result<Vec<Tensor>, EngineError> {
        let names: Vector<String> = names.iter().map(|s| s.to_string()).collect();
        let mut outputs: Vector<Mat> = Vector::new();
        self.net()?.forward(&mut outputs, &names)?;
        outputs.iter().map(|m| to_tensor(&m)).collect()
    }

    fn close(&mut self) -> Result<(), EngineError> {
        // dnn::Net は drop 時にネイティブ側のメモリを解放する
        self.net.take();
        Ok(())
    }
}

/// 2 次元の出力 Mat をテンソルに変換します。
fn to_tensor(m: &Mat) -> Result<Tensor, EngineError> {
    let rows = m.rows().max(0) as usize;
    let cols = m.cols().max(0) as usize;
    debug!("output mat: {}x{}, depth {}", rows, cols, m.depth());

    let data = match m.depth() {
        core::CV_32F => TensorData::F32(m.data_typed::<f32>()?.to_vec()),
        core::CV_64F => TensorData::F64(m.data_typed::<f64>()?.to_vec()),
        core::CV_32S => TensorData::I32(m.data_typed::<i32>()?.to_vec()),
        core::CV_16S => TensorData::I16(m.data_typed::<i16>()?.to_vec()),
        core::CV_8U => TensorData::U8(m.data_typed::<u8>()?.to_vec()),
        // CV_8S, CV_16U, CV_16F などはデコード時にエラーとする
        depth => TensorData::Other {
            code: depth,
            len: rows * cols,
        },
    };
    Ok(Tensor::new(rows, cols, data))
}
