use anyhow::{bail, Context, Result};
use rusttype::Font;
use std::sync::mpsc;
use std::thread;
use std::time::Instant;

use image::DynamicImage;
use v4l::buffer::Type;
use v4l::io::{mmap::Stream, traits::CaptureStream};
use v4l::video::Capture;
use v4l::{Device, FourCC};

use yolov3_detect::img_proc::draw_detections;
use yolov3_detect::yolov3::YoloV3;

const WEIGHTS_PATH: &str = "data/yolov3/yolov3.weights";
const CONFIG_PATH: &str = "data/yolov3/yolov3.cfg";
const LABELS_PATH: &str = "data/yolov3/coco.names";
const FONT_PATH: &str = "data/RobotoMono.ttf";

fn main() -> Result<()> {
    env_logger::init();

    let cam_device_index = 0;
    let frame_width = 640;
    let frame_height = 480;

    let mut yolo = YoloV3::new(WEIGHTS_PATH, CONFIG_PATH, LABELS_PATH)
        .context("unable to create yolo net")?;
    let font = Font::try_from_vec(std::fs::read(FONT_PATH)?).context("invalid font")?;

    // YOLOの処理中にもカメラのバッファを更新する必要があるため，マルチスレッドでカメラだけ動かしておく
    let mut loader = CamImgLoader::new(cam_device_index, frame_width, frame_height);

    std::fs::create_dir_all("./out")?;

    for i in 0..100 {
        let start = Instant::now();
        let img = loader.receive()?;

        // 1フレームの失敗ではループを止めない
        let result = match yolo.detections(&img) {
            Ok(result) => result,
            Err(e) => {
                log::warn!("frame {}: {}", i, e);
                continue;
            }
        };

        let t = start.elapsed().as_secs_f64() * 1000.0;
        println!("Processing time:{:.03}ms, {:.1}FPS", t, 1000. / t);

        let mut rgb_img = img.to_rgb8();
        draw_detections(&mut rgb_img, &result, &font, 16., 3.);
        rgb_img.save("./out/webcam.png")?;
    }

    loader.stop()?;
    yolo.close()?;
    Ok(())
}

/// カメラ画像を取得するための構造体
struct CamImgLoader {
    /// スレッドハンドル
    thread_handle: Option<thread::JoinHandle<()>>,
    /// start, stopなどコマンドのsender
    cmd_tx: mpsc::Sender<String>,
    /// カメラ画像のreceiver
    cam_img_rx: mpsc::Receiver<DynamicImage>,
}

impl CamImgLoader {
    fn new(cam_device_index: usize, frame_width: u32, frame_height: u32) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (cam_img_tx, cam_img_rx) = mpsc::channel();

        let thread_handle = Some(thread::spawn(move || {
            if let Err(e) = Self::run_cam_thread(
                cam_device_index,
                cmd_rx,
                cam_img_tx,
                frame_width,
                frame_height,
            ) {
                log::error!("camera thread stopped: {}", e);
            }
        }));
        Self {
            thread_handle,
            cmd_tx,
            cam_img_rx,
        }
    }

    /// スレッドの中身
    fn run_cam_thread(
        cam_device_index: usize,
        cmd_rx: mpsc::Receiver<String>,
        cam_img_tx: mpsc::Sender<DynamicImage>,
        frame_width: u32,
        frame_height: u32,
    ) -> Result<()> {
        let mut dev = Device::new(cam_device_index)?;

        let mut fmt = dev.format()?;
        fmt.width = frame_width;
        fmt.height = frame_height;
        fmt.fourcc = FourCC::new(b"MJPG");
        dev.set_format(&fmt)?;

        let mut cam_stream = Stream::with_buffers(&mut dev, Type::VideoCapture, 3)?;

        loop {
            let (frame, _meta) = CaptureStream::next(&mut cam_stream)?;
            let img = image::load_from_memory(frame)?;

            if let Ok(msg) = cmd_rx.try_recv() {
                if msg == "stop" {
                    break;
                } else {
                    cam_img_tx.send(img)?;
                }
            }
            thread::yield_now();
        }
        Ok(())
    }

    /// 画像をスレッドから受信します。
    fn receive(&self) -> Result<DynamicImage> {
        if self.thread_handle.is_some() {
            self.cmd_tx.send(String::from("start"))?;
        }
        Ok(self.cam_img_rx.recv()?)
    }

    /// スレッドを停止します。
    fn stop(&mut self) -> Result<()> {
        if let Some(handle) = self.thread_handle.take() {
            // スレッドが先に終了している場合は送信に失敗するが問題ない
            let _ = self.cmd_tx.send(String::from("stop"));
            if handle.join().is_err() {
                bail!("Can't join thread");
            }
        }
        Ok(())
    }
}

impl Drop for CamImgLoader {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
