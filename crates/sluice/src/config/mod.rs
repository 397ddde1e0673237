//! Configuration for the sluice ingestion service.

mod cluster_key;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

pub use cluster_key::{ClusterKey, UNKNOWN_CLUSTER};
pub use sluice_core::config::{
    ConfigArgs, ConfigPath, Mergeable, MetricsConfig, interpolate, load_from_paths,
};
use sluice_core::error::{
    ConfigError, EmptyBronzeRootSnafu, EmptyLandingRootSnafu, NoClustersSnafu, NoExtensionsSnafu,
    YamlParseSnafu,
};

fn default_raw_dir() -> PathBuf {
    PathBuf::from("data/raw")
}

fn default_settle_delay_ms() -> u64 {
    1000
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_event_buffer() -> usize {
    1024
}

fn default_infer_sample_rows() -> usize {
    1000
}

fn default_extensions() -> Vec<String> {
    vec!["xlsx".to_string(), "xls".to_string(), "csv".to_string()]
}

/// Configuration for a single cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    /// Explicit input directory. Defaults to `<landing_root>/<raw_dir>/<cluster>`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Main configuration for sluice.
///
/// # Example
///
/// ```yaml
/// landing_root: /data/Landing_zone
/// bronze_root: /data/dados/bronze
/// clusters:
///   diabetes: {}
///   renda_extra:
///     path: /mnt/other/renda_extra
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Root of the landing zone.
    #[serde(default)]
    pub landing_root: PathBuf,
    /// Sub-directory of the landing root holding one directory per cluster.
    #[serde(default = "default_raw_dir")]
    pub raw_dir: PathBuf,
    /// Root under which `<cluster>_bronze` tables are written.
    #[serde(default)]
    pub bronze_root: PathBuf,
    /// Wait between detecting a file and reading it.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Interval between directory snapshots.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Capacity of the file event channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// Rows sampled for CSV type inference.
    #[serde(default = "default_infer_sample_rows")]
    pub infer_sample_rows: usize,
    /// Accepted file extensions, case-insensitive, without the dot.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Create missing cluster directories at startup instead of skipping them.
    #[serde(default)]
    pub create_missing_dirs: bool,
    /// Named cluster configurations, in watch order.
    #[serde(default)]
    pub clusters: IndexMap<ClusterKey, ClusterConfig>,
    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            landing_root: PathBuf::new(),
            raw_dir: default_raw_dir(),
            bronze_root: PathBuf::new(),
            settle_delay_ms: default_settle_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            event_buffer: default_event_buffer(),
            infer_sample_rows: default_infer_sample_rows(),
            extensions: default_extensions(),
            create_missing_dirs: false,
            clusters: IndexMap::new(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Mergeable for Config {
    type Key = ClusterKey;
    type Component = ClusterConfig;

    fn components_mut(&mut self) -> &mut IndexMap<ClusterKey, ClusterConfig> {
        &mut self.clusters
    }

    fn metrics_mut(&mut self) -> &mut MetricsConfig {
        &mut self.metrics
    }

    fn parse_yaml(contents: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(contents).context(YamlParseSnafu)
    }

    fn merge_settings(&mut self, other: &mut Self) {
        let defaults = Config::default();

        if other.landing_root != defaults.landing_root {
            self.landing_root = std::mem::take(&mut other.landing_root);
        }
        if other.raw_dir != defaults.raw_dir {
            self.raw_dir = std::mem::take(&mut other.raw_dir);
        }
        if other.bronze_root != defaults.bronze_root {
            self.bronze_root = std::mem::take(&mut other.bronze_root);
        }
        if other.settle_delay_ms != defaults.settle_delay_ms {
            self.settle_delay_ms = other.settle_delay_ms;
        }
        if other.poll_interval_ms != defaults.poll_interval_ms {
            self.poll_interval_ms = other.poll_interval_ms;
        }
        if other.event_buffer != defaults.event_buffer {
            self.event_buffer = other.event_buffer;
        }
        if other.infer_sample_rows != defaults.infer_sample_rows {
            self.infer_sample_rows = other.infer_sample_rows;
        }
        if other.extensions != defaults.extensions {
            self.extensions = std::mem::take(&mut other.extensions);
        }
        self.create_missing_dirs |= other.create_missing_dirs;
    }
}

impl Config {
    /// Load configuration from multiple paths (files or directories).
    pub fn from_paths(paths: &[ConfigPath]) -> Result<Self, ConfigError> {
        let config: Self = load_from_paths(paths)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config = Self::parse_yaml(&interpolate(contents)?)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Checks:
    /// - landing_root and bronze_root are set
    /// - at least one cluster and one extension
    /// - no two clusters watch the same directory
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(
            !self.landing_root.as_os_str().is_empty(),
            EmptyLandingRootSnafu
        );
        ensure!(
            !self.bronze_root.as_os_str().is_empty(),
            EmptyBronzeRootSnafu
        );
        ensure!(!self.clusters.is_empty(), NoClustersSnafu);
        ensure!(
            self.extensions.iter().any(|ext| !normalize_extension(ext).is_empty()),
            NoExtensionsSnafu
        );

        let mut claimed: HashMap<PathBuf, Vec<&str>> = HashMap::new();
        for key in self.clusters.keys() {
            claimed
                .entry(self.cluster_dir(key))
                .or_default()
                .push(key.id());
        }
        let mut conflicts: Vec<String> = claimed
            .into_iter()
            .filter(|(_, keys)| keys.len() > 1)
            .map(|(dir, keys)| format!("{} claimed by: {:?}", dir.display(), keys))
            .collect();
        if !conflicts.is_empty() {
            conflicts.sort();
            return Err(ConfigError::ResourceConflict {
                message: conflicts.join("; "),
            });
        }

        Ok(())
    }

    /// `<landing_root>/<raw_dir>`.
    pub fn raw_root(&self) -> PathBuf {
        self.landing_root.join(&self.raw_dir)
    }

    /// Input directory watched for `key`.
    pub fn cluster_dir(&self, key: &ClusterKey) -> PathBuf {
        match self.clusters.get(key).and_then(|c| c.path.as_ref()) {
            Some(path) => path.clone(),
            None => self.raw_root().join(key.id()),
        }
    }

    /// Iterate over clusters with their resolved input directories, in order.
    pub fn cluster_dirs(&self) -> impl Iterator<Item = (&ClusterKey, PathBuf)> {
        self.clusters.keys().map(|key| (key, self.cluster_dir(key)))
    }

    /// Attribute a file to a cluster by its location.
    ///
    /// A configured cluster directory containing the file wins; otherwise the
    /// first directory component under the raw root names the cluster. Files
    /// matching neither belong to [`UNKNOWN_CLUSTER`].
    ///
    /// Both sides are compared in absolute form, so relative roots match the
    /// absolute paths the observer reports.
    pub fn cluster_for_path(&self, path: &Path) -> ClusterKey {
        let path = normalize_path(path);
        if let Some((key, _)) = self
            .cluster_dirs()
            .find(|(_, dir)| path.starts_with(normalize_path(dir)))
        {
            return key.clone();
        }

        if let Ok(relative) = path.strip_prefix(normalize_path(&self.raw_root())) {
            let mut components = relative.components();
            if let (Some(Component::Normal(first)), Some(_)) =
                (components.next(), components.next())
                && let Some(name) = first.to_str()
            {
                return ClusterKey::new(name);
            }
        }

        ClusterKey::unknown()
    }

    /// Whether `path` carries an accepted extension (case-insensitive).
    pub fn is_supported(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        self.extensions
            .iter()
            .any(|allowed| normalize_extension(allowed) == ext.to_ascii_lowercase())
    }

    /// Directory of the bronze table for `key`.
    pub fn table_dir(&self, key: &ClusterKey) -> PathBuf {
        self.bronze_root.join(key.table_name())
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Absolute form of `path`, without touching the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const BASE: &str = r#"
landing_root: /data/landing
bronze_root: /data/bronze
clusters:
  diabetes: {}
  emagrecimento: {}
"#;

    #[test]
    fn test_defaults() {
        let config = Config::parse(BASE).unwrap();

        assert_eq!(config.raw_dir, PathBuf::from("data/raw"));
        assert_eq!(config.settle_delay(), Duration::from_secs(1));
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.event_buffer, 1024);
        assert_eq!(config.infer_sample_rows, 1000);
        assert_eq!(config.extensions, vec!["xlsx", "xls", "csv"]);
        assert!(!config.create_missing_dirs);
        assert_eq!(config.metrics.address, "0.0.0.0:9090");
    }

    #[test]
    fn test_clusters_keep_order_and_resolve_dirs() {
        let yaml = r#"
landing_root: /data/landing
bronze_root: /data/bronze
clusters:
  renda_extra:
    path: /mnt/other/renda
  diabetes: {}
"#;
        let config = Config::parse(yaml).unwrap();
        let dirs: Vec<_> = config
            .cluster_dirs()
            .map(|(k, d)| (k.id().to_string(), d))
            .collect();

        assert_eq!(
            dirs,
            vec![
                ("renda_extra".to_string(), PathBuf::from("/mnt/other/renda")),
                (
                    "diabetes".to_string(),
                    PathBuf::from("/data/landing/data/raw/diabetes")
                ),
            ]
        );
        assert_eq!(
            config.table_dir(&ClusterKey::new("diabetes")),
            PathBuf::from("/data/bronze/diabetes_bronze")
        );
    }

    #[test]
    fn test_cluster_for_path() {
        let yaml = r#"
landing_root: /data/landing
bronze_root: /data/bronze
clusters:
  diabetes: {}
  renda_extra:
    path: /mnt/other/renda
"#;
        let config = Config::parse(yaml).unwrap();

        let cases = [
            ("/data/landing/data/raw/diabetes/a.csv", "diabetes"),
            ("/mnt/other/renda/sub/b.xlsx", "renda_extra"),
            ("/data/landing/data/raw/novo/c.csv", "novo"),
            ("/data/landing/data/raw/loose.csv", UNKNOWN_CLUSTER),
            ("/elsewhere/d.csv", UNKNOWN_CLUSTER),
        ];
        for (path, expected) in cases {
            assert_eq!(config.cluster_for_path(Path::new(path)).id(), expected, "{path}");
        }
    }

    #[test]
    fn test_cluster_for_path_with_relative_roots() {
        let yaml = r#"
landing_root: landing
bronze_root: bronze
clusters:
  diabetes: {}
  renda_extra:
    path: outros/renda
"#;
        let config = Config::parse(yaml).unwrap();
        let cwd = std::env::current_dir().unwrap();

        let cases = [
            (cwd.join("landing/data/raw/diabetes/a.csv"), "diabetes"),
            (cwd.join("outros/renda/b.xlsx"), "renda_extra"),
            (cwd.join("landing/data/raw/novo/c.csv"), "novo"),
            (PathBuf::from("landing/data/raw/diabetes/d.csv"), "diabetes"),
        ];
        for (path, expected) in cases {
            assert_eq!(
                config.cluster_for_path(&path).id(),
                expected,
                "{}",
                path.display()
            );
        }
    }

    #[test]
    fn test_extension_allow_list_is_case_insensitive() {
        let config = Config::parse(BASE).unwrap();

        assert!(config.is_supported(Path::new("a.CSV")));
        assert!(config.is_supported(Path::new("a.Xlsx")));
        assert!(config.is_supported(Path::new("a.xls")));
        assert!(!config.is_supported(Path::new("a.json")));
        assert!(!config.is_supported(Path::new("README")));
    }

    #[test]
    fn test_missing_roots_rejected() {
        let err = Config::parse("bronze_root: /b\nclusters:\n  a: {}\n").unwrap_err();
        assert!(matches!(err, ConfigError::EmptyLandingRoot));

        let err = Config::parse("landing_root: /l\nclusters:\n  a: {}\n").unwrap_err();
        assert!(matches!(err, ConfigError::EmptyBronzeRoot));
    }

    #[test]
    fn test_no_clusters_rejected() {
        let err = Config::parse("landing_root: /l\nbronze_root: /b\n").unwrap_err();
        assert!(matches!(err, ConfigError::NoClusters));
    }

    #[test]
    fn test_empty_extensions_rejected() {
        let yaml = format!("{BASE}extensions: []\n");
        let err = Config::parse(&yaml).unwrap_err();
        assert!(matches!(err, ConfigError::NoExtensions));
    }

    #[test]
    fn test_resource_conflict_same_dir() {
        let yaml = r#"
landing_root: /data/landing
bronze_root: /data/bronze
clusters:
  diabetes: {}
  alias:
    path: /data/landing/data/raw/diabetes
"#;
        let err = Config::parse(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::ResourceConflict { .. }));
        assert!(err.to_string().contains("diabetes"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = format!("{BASE}settle_delay: 5\n");
        assert!(matches!(
            Config::parse(&yaml).unwrap_err(),
            ConfigError::YamlParse { .. }
        ));
    }

    #[test]
    fn test_from_paths_merges_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("00-base.yaml"),
            "landing_root: /l\nbronze_root: /b\nclusters:\n  diabetes: {}\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("10-extra.yaml"),
            "settle_delay_ms: 50\nclusters:\n  emagrecimento: {}\nmetrics:\n  address: 127.0.0.1:9999\n",
        )
        .unwrap();

        let config = Config::from_paths(&[ConfigPath::dir(dir.path())]).unwrap();

        assert_eq!(config.landing_root, PathBuf::from("/l"));
        assert_eq!(config.settle_delay_ms, 50);
        assert_eq!(config.clusters.len(), 2);
        assert_eq!(config.metrics.address, "127.0.0.1:9999");
    }
}
