use std::path::{Path, PathBuf};

use anyhow::Context;
use nalgebra::{Quaternion, Vector3};

use super::DatasetTrait;
use crate::global_types::{Pose, Timestamp};
use crate::utility::Utility;

#[derive(Debug, Default)]
pub struct EuRoCDataset {
    pub cam0s: Vec<(Timestamp, PathBuf)>,
    pub cam1s: Vec<(Timestamp, PathBuf)>,
    /// body (IMU) to world
    pub ground_truth: Vec<(Timestamp, Pose)>,
    /// camera to body, `T_BS` of each sensor.yaml
    pub cam0_extrinsic: Option<Pose>,
    pub cam1_extrinsic: Option<Pose>,
}

impl EuRoCDataset {
    const EUROC_CAM0_PATH: &'static str = "mav0/cam0/";
    const EUROC_CAM1_PATH: &'static str = "mav0/cam1/";
    const EUROC_GT_PATH: &'static str = "mav0/state_groundtruth_estimate0/";
    /// 真值与图像时间戳的最大间隔 (ns)
    const MAX_GT_OFFSET: i64 = 5_000_000;

    pub fn read_cam(path: &Path) -> anyhow::Result<Vec<(Timestamp, PathBuf)>> {
        let csv_path = path.join("data.csv");
        let data_path = path.join("data");
        let mut reader = csv::Reader::from_path(&csv_path)
            .with_context(|| format!("cannot read {}", csv_path.display()))?;
        let mut cams = Vec::new();
        for record in reader.records() {
            let record = record?;
            let timestamp = record[0].trim().parse::<i64>()?;
            let name = record[1].trim();
            cams.push((Timestamp(timestamp), data_path.join(name)));
        }
        cams.sort_by_key(|(t, _)| *t);
        Ok(cams)
    }

    /// `timestamp, p_x, p_y, p_z, q_w, q_x, q_y, q_z, ...`
    pub fn read_ground_truth(path: &Path) -> anyhow::Result<Vec<(Timestamp, Pose)>> {
        let csv_path = path.join("data.csv");
        let mut reader = csv::Reader::from_path(&csv_path)
            .with_context(|| format!("cannot read {}", csv_path.display()))?;
        let mut poses = Vec::new();
        for record in reader.records() {
            let record = record?;
            anyhow::ensure!(record.len() >= 8, "short ground truth row: {record:?}");
            let value = |i: usize| record[i].trim().parse::<f64>();
            let timestamp = record[0].trim().parse::<i64>()?;
            let translation = Vector3::new(value(1)?, value(2)?, value(3)?);
            let q = Quaternion::new(value(4)?, value(5)?, value(6)?, value(7)?);
            poses.push((Timestamp(timestamp), Utility::pose_from_quaternion(&translation, &q)));
        }
        poses.sort_by_key(|(t, _)| *t);
        Ok(poses)
    }

    /// `T_BS` of a sensor.yaml: 16 row-major values after `data:`.
    pub fn read_extrinsic(path: &Path) -> anyhow::Result<Pose> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        let block = text
            .split_once("T_BS")
            .and_then(|(_, rest)| rest.split_once("data:"))
            .and_then(|(_, rest)| rest.split_once('['))
            .and_then(|(_, rest)| rest.split_once(']'))
            .map(|(values, _)| values)
            .with_context(|| format!("no T_BS in {}", path.display()))?;
        let values = block
            .split(',')
            .map(|v| v.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()?;
        anyhow::ensure!(values.len() == 16, "T_BS needs 16 values, got {}", values.len());
        Ok(Pose::from_row_slice(&values[..12]))
    }

    pub fn new(path: &str) -> anyhow::Result<Self> {
        let path = Path::new(path);
        let cam0_base_path = path.join(Self::EUROC_CAM0_PATH);
        let cam1_base_path = path.join(Self::EUROC_CAM1_PATH);
        let gt_base_path = path.join(Self::EUROC_GT_PATH);

        // read cam0
        let cam0s = Self::read_cam(&cam0_base_path)?;
        // read cam1
        let cam1s = if cam1_base_path.join("data.csv").exists() {
            Self::read_cam(&cam1_base_path)?
        } else {
            Vec::new()
        };
        let ground_truth = if gt_base_path.join("data.csv").exists() {
            Self::read_ground_truth(&gt_base_path)?
        } else {
            Vec::new()
        };
        let extrinsic = |base: &Path| {
            let sensor = base.join("sensor.yaml");
            sensor
                .exists()
                .then(|| Self::read_extrinsic(&sensor))
                .transpose()
        };
        let dataset = Self {
            cam0_extrinsic: extrinsic(&cam0_base_path)?,
            cam1_extrinsic: extrinsic(&cam1_base_path)?,
            cam0s,
            cam1s,
            ground_truth,
        };
        log::info!(
            "dataset {}: {} images, {} stereo images, {} ground truth poses",
            path.display(),
            dataset.cam0s.len(),
            dataset.cam1s.len(),
            dataset.ground_truth.len()
        );
        Ok(dataset)
    }
}

impl DatasetTrait for EuRoCDataset {
    fn read_t_cam0_list(&self) -> &[(Timestamp, PathBuf)] {
        &self.cam0s
    }

    fn stereo_image_path(&self, timestamp: Timestamp) -> Option<&Path> {
        self.cam1s
            .binary_search_by_key(&timestamp, |(t, _)| *t)
            .ok()
            .map(|index| self.cam1s[index].1.as_path())
    }

    /// Nearest ground-truth sample, composed with the camera extrinsic.
    fn ground_truth_pose(&self, timestamp: Timestamp) -> Option<Pose> {
        let upper = self.ground_truth.partition_point(|(t, _)| *t < timestamp);
        let (t, body) = [upper.checked_sub(1), Some(upper)]
            .into_iter()
            .flatten()
            .filter_map(|i| self.ground_truth.get(i))
            .min_by_key(|(t, _)| (t.0 - timestamp.0).abs())?;
        if (t.0 - timestamp.0).abs() > Self::MAX_GT_OFFSET {
            return None;
        }
        Some(match self.cam0_extrinsic.as_ref() {
            Some(extrinsic) => Utility::compose(body, extrinsic),
            None => *body,
        })
    }

    fn stereo_pose(&self) -> Option<Pose> {
        let cam1 = self.cam1_extrinsic.as_ref()?;
        let cam0 = self.cam0_extrinsic.as_ref()?;
        Some(Utility::compose(&Utility::invert_pose(cam0), cam1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(path: &Path, text: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    fn sensor_yaml(tx: f64) -> String {
        format!(
            "sensor_type: camera\nT_BS:\n  cols: 4\n  rows: 4\n  data: [1.0, 0.0, 0.0, {tx},\n         0.0, 1.0, 0.0, 0.0,\n         0.0, 0.0, 1.0, 0.0,\n         0.0, 0.0, 0.0, 1.0]\nrate_hz: 20\n"
        )
    }

    #[test]
    fn test_read_dataset() {
        let root = std::env::temp_dir().join("omni_slam_euroc_test");
        let _ = fs::remove_dir_all(&root);
        write(
            &root.join("mav0/cam0/data.csv"),
            "#timestamp [ns],filename\n2000000,2000000.png\n1000000,1000000.png\n",
        );
        write(&root.join("mav0/cam0/sensor.yaml"), &sensor_yaml(-0.05));
        write(
            &root.join("mav0/cam1/data.csv"),
            "#timestamp [ns],filename\n1000000,1000000.png\n2000000,2000000.png\n",
        );
        write(&root.join("mav0/cam1/sensor.yaml"), &sensor_yaml(0.05));
        write(
            &root.join("mav0/state_groundtruth_estimate0/data.csv"),
            "#timestamp,p_x,p_y,p_z,q_w,q_x,q_y,q_z,v_x\n\
             999000,1.0,2.0,3.0,1.0,0.0,0.0,0.0,0.0\n\
             1999500,4.0,5.0,6.0,0.0,0.0,0.0,1.0,0.0\n",
        );

        let dataset = EuRoCDataset::new(root.to_str().unwrap()).unwrap();
        let cams = dataset.read_t_cam0_list();
        assert_eq!(cams.len(), 2);
        assert_eq!(cams[0].0, Timestamp(1_000_000));
        assert!(cams[0].1.ends_with("mav0/cam0/data/1000000.png"));
        assert!(dataset
            .stereo_image_path(Timestamp(2_000_000))
            .unwrap()
            .ends_with("cam1/data/2000000.png"));
        assert!(dataset.stereo_image_path(Timestamp(1_500_000)).is_none());

        // camera sits 5 cm along -x of the body
        let pose = dataset.ground_truth_pose(Timestamp(1_000_000)).unwrap();
        assert!((Utility::translation(&pose) - Vector3::new(0.95, 2.0, 3.0)).norm() < 1e-12);
        // 180 degrees about z flips the extrinsic offset
        let pose = dataset.ground_truth_pose(Timestamp(2_000_000)).unwrap();
        assert!((Utility::translation(&pose) - Vector3::new(4.05, 5.0, 6.0)).norm() < 1e-12);
        assert!(dataset.ground_truth_pose(Timestamp(50_000_000)).is_none());

        let stereo = dataset.stereo_pose().unwrap();
        assert!((Utility::translation(&stereo) - Vector3::new(0.1, 0.0, 0.0)).norm() < 1e-12);
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_mono_dataset_without_ground_truth() {
        let root = std::env::temp_dir().join("omni_slam_euroc_mono_test");
        let _ = fs::remove_dir_all(&root);
        write(&root.join("mav0/cam0/data.csv"), "#timestamp [ns],filename\n5,5.png\n");
        let dataset = EuRoCDataset::new(root.to_str().unwrap()).unwrap();
        assert_eq!(dataset.read_t_cam0_list().len(), 1);
        assert!(dataset.ground_truth_pose(Timestamp(5)).is_none());
        assert!(dataset.stereo_pose().is_none());
        assert!(dataset.stereo_image_path(Timestamp(5)).is_none());
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_missing_cam0_is_an_error() {
        let root = std::env::temp_dir().join("omni_slam_euroc_empty_test");
        let _ = fs::remove_dir_all(&root);
        fs::create_dir_all(&root).unwrap();
        assert!(EuRoCDataset::new(root.to_str().unwrap()).is_err());
        fs::remove_dir_all(&root).unwrap();
    }
}
