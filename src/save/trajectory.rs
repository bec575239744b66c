use std::path::Path;

use anyhow::Context;

use crate::module::PoseRecord;

/// One CSV row per record, with a header row named after the fields.
pub fn write_trajectory(path: impl AsRef<Path>, records: &[PoseRecord]) -> anyhow::Result<()> {
    let path = path.as_ref();
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("cannot create {}", path.display()))?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    log::info!("{} poses written to {}", records.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_trajectory() {
        let path = std::env::temp_dir().join("omni_slam_trajectory_test.csv");
        let records = [
            PoseRecord {
                frame_id: 0,
                time: 0.5,
                x: 1.0,
                y: 2.0,
                z: 3.0,
                qx: 0.0,
                qy: 0.0,
                qz: 0.0,
                qw: 1.0,
            },
            PoseRecord {
                frame_id: 4,
                time: 0.7,
                x: -1.0,
                y: 0.0,
                z: 0.25,
                qx: 0.0,
                qy: 1.0,
                qz: 0.0,
                qw: 0.0,
            },
        ];
        write_trajectory(&path, &records).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let header = reader.headers().unwrap().clone();
        assert_eq!(
            header.iter().collect::<Vec<_>>(),
            vec!["frame_id", "time", "x", "y", "z", "qx", "qy", "qz", "qw"]
        );
        let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[1][0], "4");
        assert_eq!(rows[1][4].parse::<f64>().unwrap(), 0.25);
        std::fs::remove_file(&path).unwrap();
    }
}
