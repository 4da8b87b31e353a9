use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::SeriesPoint;
use crate::error::EcoError;

/// Output tree of per-(hotspot, metric) series files.
#[derive(Debug, Clone)]
pub struct SeriesStore {
    root: Utf8PathBuf,
}

impl SeriesStore {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn path_for(&self, hotspot_id: &str, metric_key: &str) -> Utf8PathBuf {
        self.root
            .join(hotspot_id)
            .join(format!("{metric_key}.json"))
    }

    /// Writes the series as pretty JSON with a trailing newline and returns
    /// the destination path.
    pub fn write_series(
        &self,
        hotspot_id: &str,
        metric_key: &str,
        series: &[SeriesPoint],
    ) -> Result<Utf8PathBuf, EcoError> {
        let path = self.path_for(hotspot_id, metric_key);
        let mut content = serde_json::to_vec_pretty(series)
            .map_err(|err| EcoError::Filesystem(err.to_string()))?;
        content.push(b'\n');
        write_atomic(&path, &content)?;
        Ok(path)
    }

    pub fn read_series(
        &self,
        hotspot_id: &str,
        metric_key: &str,
    ) -> Result<Vec<SeriesPoint>, EcoError> {
        let path = self.path_for(hotspot_id, metric_key);
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| EcoError::Filesystem(format!("read {path}: {err}")))?;
        serde_json::from_str(&content).map_err(|err| EcoError::Parse(format!("{path}: {err}")))
    }
}

/// Readers see either the previous file or the complete new one.
pub fn write_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), EcoError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| EcoError::Filesystem(format!("create {parent}: {err}")))?;
    }
    let tmp_path = path.with_extension("json.tmp");
    fs::write(tmp_path.as_std_path(), content)
        .map_err(|err| EcoError::Filesystem(format!("write {tmp_path}: {err}")))?;
    fs::rename(tmp_path.as_std_path(), path.as_std_path()).map_err(|err| {
        let _ = fs::remove_file(tmp_path.as_std_path());
        EcoError::Filesystem(format!("rename into {path}: {err}"))
    })
}
