use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use pf_types::{DataError, ObjectiveMode, RewardSink};

/// Append-only reward log: one file per objective, one reward per line.
#[derive(Debug, Clone)]
pub struct FileRewardLog {
    dir: PathBuf,
}

impl FileRewardLog {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// `<dir>/<objective>_reward.txt`
    pub fn path_for(&self, objective: ObjectiveMode) -> PathBuf {
        self.dir.join(format!("{}_reward.txt", objective.name()))
    }

    /// Read back every reward logged for `objective`.
    pub fn read_all(&self, objective: ObjectiveMode) -> Result<Vec<f64>, DataError> {
        let path = self.path_for(objective);
        if !path.exists() {
            return Ok(Vec::new());
        }
        std::fs::read_to_string(&path)?
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                line.trim().parse::<f64>().map_err(|e| DataError::ParseError {
                    message: format!("Invalid reward '{}' in {}: {}", line, path.display(), e),
                })
            })
            .collect()
    }
}

impl RewardSink for FileRewardLog {
    fn append(&mut self, objective: ObjectiveMode, reward: f64) -> Result<(), DataError> {
        let path = self.path_for(objective);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{reward}")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn rewards_append_per_objective() {
        let dir = TempDir::new().unwrap();
        let mut log = FileRewardLog::new(dir.path());

        log.append(ObjectiveMode::Overall, 5.0).unwrap();
        log.append(ObjectiveMode::Overall, -1.25).unwrap();
        log.append(ObjectiveMode::Spatial, 0.5).unwrap();

        assert_eq!(log.read_all(ObjectiveMode::Overall).unwrap(), vec![5.0, -1.25]);
        assert_eq!(log.read_all(ObjectiveMode::Spatial).unwrap(), vec![0.5]);
        assert!(log.read_all(ObjectiveMode::Pathway).unwrap().is_empty());
        assert!(dir.path().join("overall_reward.txt").exists());
    }

    #[test]
    fn appends_survive_reopening() {
        let dir = TempDir::new().unwrap();
        FileRewardLog::new(dir.path())
            .append(ObjectiveMode::CorrelationRatio, 1.0)
            .unwrap();
        FileRewardLog::new(dir.path())
            .append(ObjectiveMode::CorrelationRatio, 2.0)
            .unwrap();

        let text = std::fs::read_to_string(dir.path().join("corr_reward.txt")).unwrap();
        assert_eq!(text, "1\n2\n");
    }
}
