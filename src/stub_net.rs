//! テスト用の推論エンジン
//!
//! 決まったテンソルを返し、呼び出し内容を記録します。失敗を注入することもできます。

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::{Backend, Target};
use crate::neural_net::{Blob, EngineError, NetFactory, NeuralNet, Tensor};

/// スタブに対して行われた呼び出しの記録
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StubCalls {
    pub backends: Vec<Backend>,
    pub targets: Vec<Target>,
    /// (入力層名, ブロブの形状)
    pub inputs: Vec<(String, [usize; 4])>,
    pub forwards: Vec<Vec<String>>,
    pub closes: usize,
}

/// プログラム可能なスタブエンジン
///
/// `clone` したスタブは呼び出し記録を共有します。
#[derive(Debug, Clone, Default)]
pub struct StubNet {
    outputs: Vec<Tensor>,
    backend_error: Option<String>,
    target_error: Option<String>,
    forward_error: Option<String>,
    calls: Arc<Mutex<StubCalls>>,
}

impl StubNet {
    pub fn new() -> Self {
        Self::default()
    }

    /// `forward_layers` が毎回返すテンソルを設定します。
    pub fn with_outputs(mut self, outputs: Vec<Tensor>) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn fail_backend(mut self, message: &str) -> Self {
        self.backend_error = Some(message.to_string());
        self
    }

    pub fn fail_target(mut self, message: &str) -> Self {
        self.target_error = Some(message.to_string());
        self
    }

    pub fn fail_forward(mut self, message: &str) -> Self {
        self.forward_error = Some(message.to_string());
        self
    }

    /// これまでの呼び出し記録のコピー
    pub fn calls(&self) -> StubCalls {
        self.lock().clone()
    }

    /// このスタブの複製を返すエンジン生成関数
    pub fn into_factory(self) -> NetFactory {
        Arc::new(
            move |_: &Path, _: &Path| -> Result<Box<dyn NeuralNet>, EngineError> {
                Ok(Box::new(self.clone()))
            },
        )
    }

    fn lock(&self) -> MutexGuard<'_, StubCalls> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl NeuralNet for StubNet {
    fn set_preferable_backend(&mut self, backend: Backend) -> Result<(), EngineError> {
        self.lock().backends.push(backend);
        match &self.backend_error {
            Some(msg) => Err(EngineError::new(msg.as_str())),
            None => Ok(()),
        }
    }

    fn set_preferable_target(&mut self, target: Target) -> Result<(), EngineError> {
        self.lock().targets.push(target);
        match &self.target_error {
            Some(msg) => Err(EngineError::new(msg.as_str())),
            None => Ok(()),
        }
    }

    fn set_input(&mut self, blob: &Blob, name: &str) -> Result<(), EngineError> {
        self.lock().inputs.push((name.to_string(), blob.shape()));
        Ok(())
    }

    fn forward_layers(&mut self, names: &[&str]) -> Result<Vec<Tensor>, EngineError> {
        self.lock()
            .forwards
            .push(names.iter().map(|s| s.to_string()).collect());
        match &self.forward_error {
            Some(msg) => Err(EngineError::new(msg.as_str())),
            None => Ok(self.outputs.clone()),
        }
    }

    fn close(&mut self) -> Result<(), EngineError> {
        self.lock().closes += 1;
        Ok(())
    }
}
