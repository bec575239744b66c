/// omni-slam <dataset_dir> <camera_yaml> [config.json]
///
/// dataset_dir is in EuRoC layout, e.g. /home/qi/V201
/// OMNI_SLAM_SHOW=1 shows the tracking overlay.
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use opencv::core::Mat;
use opencv::highgui;
use opencv::imgcodecs;
use opencv::prelude::*;

use omni_slam::camera::{load_camera_from_yaml, CameraModel};
use omni_slam::config::SlamConfig;
use omni_slam::data::Frame;
use omni_slam::dataset::{DatasetTrait, DefaultDataset};
use omni_slam::global_types::IdGenerator;
use omni_slam::module::SlamPipeline;
use omni_slam::save;

const FREQUENCY: i32 = 30;

fn main() -> anyhow::Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_nanos()
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        let program = args.first().map(String::as_str).unwrap_or("omni-slam");
        anyhow::bail!("usage: {program} <dataset_dir> <camera_yaml> [config.json]");
    }
    let path = &args[1];
    log::info!("path: {:?}", path);
    let dataset = DefaultDataset::new(path)?;

    let camera: Arc<dyn CameraModel> = Arc::from(load_camera_from_yaml(&args[2])?);
    let config = match args.get(3) {
        Some(config_path) => SlamConfig::from_json_file(config_path)?,
        None => SlamConfig::default(),
    };
    let show = std::env::var_os("OMNI_SLAM_SHOW").is_some();

    let frame_ids = IdGenerator::new();
    let landmark_ids = Arc::new(IdGenerator::new());
    let mut slam = SlamPipeline::from_config(&config, landmark_ids)?;
    let stereo_pose = dataset.stereo_pose();

    for (timestamp, image_path) in dataset.read_t_cam0_list() {
        let img = imgcodecs::imread(&image_path.to_string_lossy(), imgcodecs::IMREAD_GRAYSCALE)?;
        if img.empty() {
            log::warn!("cannot read {}", image_path.display());
            continue;
        }
        let mut builder = Frame::builder(img, timestamp.as_sec(), camera.clone());
        if let Some(pose) = dataset.ground_truth_pose(*timestamp) {
            builder = builder.pose(pose);
        }
        if let (Some(stereo_path), Some(stereo_pose)) =
            (dataset.stereo_image_path(*timestamp), stereo_pose)
        {
            let stereo =
                imgcodecs::imread(&stereo_path.to_string_lossy(), imgcodecs::IMREAD_GRAYSCALE)?;
            if !stereo.empty() {
                builder = builder.stereo(stereo, stereo_pose, camera.clone());
            }
        }
        let frame = builder.build(&frame_ids);
        log::info!("timestamp={} frame={}", timestamp.0, frame.id());
        slam.process_frame(frame)?;

        if show {
            let mut img_show: Mat = match slam.tracking().frames().last() {
                Some(frame) => frame.image().try_clone()?,
                None => continue,
            };
            slam.visualize(&mut img_show)?;
            highgui::imshow("Tracking", &img_show)?;
            highgui::wait_key(1000 / FREQUENCY)?;
        }
    }

    let records = slam.finish();
    let out = Path::new(path);
    save::write_trajectory(out.join("trajectory.csv"), &records)
        .context("saving trajectory")?;
    save::write_stats(out.join("tracking_stats.json"), slam.tracking().stats())
        .context("saving tracking statistics")?;
    Ok(())
}
