use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::Context;

use crate::module::TrackingStats;

pub fn write_stats(path: impl AsRef<Path>, stats: &TrackingStats) -> anyhow::Result<()> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
    serde_json::to_writer(BufWriter::new(file), stats)?;
    log::info!(
        "tracking statistics of {} frames written to {}",
        stats.frame_track_counts.len(),
        path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufReader;

    use crate::module::{FrameTrackCount, RadialDistance};

    #[test]
    fn test_stats_as_json() {
        let path = std::env::temp_dir().join("omni_slam_stats_test.json");
        let stats = TrackingStats {
            track_lengths: vec![3, 0, 7],
            final_track_lengths: vec![2],
            failure_rad_dists: vec![RadialDistance {
                radius: 0.25,
                frame_num: 3,
            }],
            frame_track_counts: vec![FrameTrackCount {
                frame_num: 1,
                num_tracked: 12,
            }],
            ..Default::default()
        };
        write_stats(&path, &stats).unwrap();

        let file = File::open(&path).unwrap();
        let json: serde_json::Value = serde_json::from_reader(BufReader::new(file)).unwrap();
        assert_eq!(json["track_lengths"], serde_json::json!([3, 0, 7]));
        assert_eq!(json["final_track_lengths"][0], 2);
        assert_eq!(json["failure_rad_dists"][0]["radius"], 0.25);
        assert_eq!(json["frame_track_counts"][0]["num_tracked"], 12);
        assert!(json["radial_errors"].as_array().unwrap().is_empty());
        std::fs::remove_file(&path).unwrap();
    }
}
