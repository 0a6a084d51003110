//! # YOLOv3 物体検出ライブラリ
//!
//! このクレートは、学習済みの YOLOv3 ネットワークの出力をラベル付きのバウンディングボックスに変換するRustライブラリです。
//!
//! ## 主な機能
//!
//! 1. **推論エンジンの抽象化**: 順伝播は [`neural_net::NeuralNet`] を実装したエンジンに任せます。
//! 2. **出力のデコード**: 3 つの出力テンソルからクラス、コンフィデンス、ボックスを取り出します。
//! 3. **NMS**: 重なったボックスのうちコンフィデンスが最大のものだけを残します。
//! 4. **描画**: 検出結果を画像に描画します。
//!
//! ## Example
//! ```no_run
//! # fn main() -> Result<(), yolov3_detect::error::YoloError> {
//! use yolov3_detect::yolov3::YoloV3;
//!
//! let mut yolo = YoloV3::new("data/yolov3.weights", "data/yolov3.cfg", "data/coco.names")?;
//! let frame = image::open("data/bird.jpg").expect("image");
//! for d in yolo.detections(&frame)? {
//!     println!("{}: {:.2} {:?}", d.class_name, d.confidence, d.bounding_box);
//! }
//! yolo.close()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod detection_result;
pub mod error;
pub mod img_proc;
pub mod neural_net;
pub mod nms;
pub mod postprocess;
pub mod stub_net;
pub mod yolov3;

#[cfg(feature = "opencv-engine")]
pub mod opencv_net;
