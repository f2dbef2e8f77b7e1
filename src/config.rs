use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    // How long written entries live, in seconds. 0 keeps them forever.
    pub ttl_secs: u64,
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // Sub-second remainders round up, so a nonzero ttl never turns into 0.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl_secs = ttl
            .as_secs()
            .saturating_add(u64::from(ttl.subsec_nanos() > 0));
        self
    }

    // The time-to-live attached to every entry of a write.
    pub fn entry_ttl(&self) -> Option<Duration> {
        match self.ttl_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn from_json_str(s: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_json_str(&contents).with_context(|| format!("parsing config {}", path.display()))
    }

    // Writes to a sibling temp file first and renames it over `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        let tmp_path = Self::tmp_path(path);
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .create(true)
            .open(&tmp_path)?;
        let encoded = serde_json::to_string_pretty(self)?;
        file.write_all(encoded.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    fn tmp_path(path: &Path) -> PathBuf {
        let mut name = path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl() {
        assert_eq!(StoreConfig::default().entry_ttl(), None);
        let cfg = StoreConfig::new().ttl(Duration::from_secs(90));
        assert_eq!(cfg.ttl_secs, 90);
        assert_eq!(cfg.entry_ttl(), Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_subsecond_ttl_rounds_up() {
        let cfg = StoreConfig::new().ttl(Duration::from_millis(500));
        assert_eq!(cfg.entry_ttl(), Some(Duration::from_secs(1)));
        assert_eq!(StoreConfig::new().ttl(Duration::from_millis(1_500)).ttl_secs, 2);
        assert_eq!(StoreConfig::new().ttl(Duration::from_nanos(1)).ttl_secs, 1);
        assert_eq!(StoreConfig::new().ttl(Duration::ZERO).entry_ttl(), None);
        assert_eq!(StoreConfig::new().ttl(Duration::MAX).ttl_secs, u64::MAX);
    }

    #[test]
    fn test_from_json() {
        assert_eq!(
            StoreConfig::from_json_str(r#"{"ttl_secs": 3600}"#).unwrap(),
            StoreConfig { ttl_secs: 3600 }
        );
        // Missing fields take their defaults.
        assert_eq!(StoreConfig::from_json_str("{}").unwrap(), StoreConfig::default());
        assert!(StoreConfig::from_json_str(r#"{"ttl_secs": -1}"#).is_err());
    }

    #[test]
    fn test_load_and_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        assert!(StoreConfig::load(&path).is_err());

        fs::write(&path, r#"{"ttl_secs": 60}"#).unwrap();
        assert_eq!(StoreConfig::load(&path).unwrap().entry_ttl(), Some(Duration::from_secs(60)));

        let cfg = StoreConfig::new().ttl(Duration::from_secs(7));
        cfg.save(&path).unwrap();
        assert_eq!(StoreConfig::load(&path).unwrap(), cfg);
        assert!(!StoreConfig::tmp_path(&path).exists());
    }
}
