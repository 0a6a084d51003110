use anyhow::{Context, Result};
use rusttype::Font;
use std::time::Instant;

use yolov3_detect::img_proc::draw_detections;
use yolov3_detect::yolov3::YoloV3;

const WEIGHTS_PATH: &str = "data/yolov3/yolov3.weights";
const CONFIG_PATH: &str = "data/yolov3/yolov3.cfg";
const LABELS_PATH: &str = "data/yolov3/coco.names";
const FONT_PATH: &str = "data/RobotoMono.ttf";

fn main() -> Result<()> {
    env_logger::init();

    // 第1引数で画像を指定できる
    let image_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "data/example_images/bird.jpg".to_string());

    // YOLOのモデルを初期化
    let mut yolo = YoloV3::new(WEIGHTS_PATH, CONFIG_PATH, LABELS_PATH)
        .context("unable to create yolo net")?;

    // テスト画像を読み込む
    let img = image::open(&image_path)?;

    let start = Instant::now();

    // 物体検出
    let result = yolo.detections(&img).context("unable to retrieve predictions")?;

    let end = start.elapsed();
    let t = end.as_secs_f64() * 1000.0;
    println!("{:?}", result);
    println!("Processing time:{:.03}ms, {:.1}FPS", t, 1000. / t);

    // BBox描画のためDynamicImageをRGB画像に変換
    let font = Font::try_from_vec(std::fs::read(FONT_PATH)?).context("invalid font")?;
    let mut rgb_img = img.to_rgb8();
    draw_detections(&mut rgb_img, &result, &font, 16., 3.);

    // 画像を保存
    std::fs::create_dir_all("./out")?;
    rgb_img.save("./out/out.png")?;

    yolo.close()?;
    Ok(())
}
