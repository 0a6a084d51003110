use anyhow::{Context, Result};
use std::time::Instant;

use yolov3_detect::config::{Backend, Config, Target};
use yolov3_detect::yolov3::YoloV3;

const WEIGHTS_PATH: &str = "data/yolov3/yolov3.weights";
const CONFIG_PATH: &str = "data/yolov3/yolov3.cfg";
const LABELS_PATH: &str = "data/yolov3/coco.names";

fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let image_path = args
        .next()
        .unwrap_or_else(|| "data/example_images/bird.jpg".to_string());

    // 第2引数に TOML を指定した場合はそちらを使う
    let config = match args.next() {
        Some(path) => Config::load(path)?,
        None => Config {
            backend: Backend::Cuda,
            target: Target::Cuda,
            ..Config::default()
        },
    };
    println!("{:?}", config);

    let mut yolo = YoloV3::with_config(WEIGHTS_PATH, CONFIG_PATH, LABELS_PATH, config)
        .context("unable to create yolo net")?;
    let img = image::open(&image_path)?;

    // 1回目はCUDAの初期化を含むため、2回計測する
    for _ in 0..2 {
        let start = Instant::now();
        let result = yolo.detections(&img)?;
        let t = start.elapsed().as_secs_f64() * 1000.0;
        println!("{} detections, Processing time:{:.03}ms", result.len(), t);
    }

    yolo.close()?;
    Ok(())
}
