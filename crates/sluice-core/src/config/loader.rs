//! Multi-file configuration loading.

use std::path::Path;

use indexmap::IndexMap;
use snafu::prelude::*;

use crate::config::{ConfigPath, MetricsConfig, interpolate, is_yaml_file};
use crate::error::{ConfigError, ReadFileSnafu};

/// Trait for configs that can be merged from multiple files.
///
/// Components (keyed entries such as clusters) are unioned and must not
/// repeat across files. Scalar settings are last-write-wins.
pub trait Mergeable: Sized + Default {
    type Key: Eq + std::hash::Hash + Clone + std::fmt::Display;
    type Component;

    fn components_mut(&mut self) -> &mut IndexMap<Self::Key, Self::Component>;
    fn metrics_mut(&mut self) -> &mut MetricsConfig;
    fn parse_yaml(contents: &str) -> Result<Self, ConfigError>;

    /// Merge the non-component, non-metrics settings of `other` into `self`.
    fn merge_settings(&mut self, other: &mut Self);

    fn merge(&mut self, mut other: Self) -> Result<(), ConfigError> {
        let duplicates: Vec<String> = other
            .components_mut()
            .keys()
            .filter(|key| self.components_mut().contains_key(*key))
            .map(|key| key.to_string())
            .collect();

        if !duplicates.is_empty() {
            return Err(ConfigError::DuplicateComponents { keys: duplicates });
        }

        for (key, component) in other.components_mut().drain(..) {
            self.components_mut().insert(key, component);
        }

        self.merge_settings(&mut other);
        self.metrics_mut()
            .merge_from(std::mem::take(other.metrics_mut()));
        Ok(())
    }
}

/// Load and merge every file and directory in `paths`, in order.
///
/// All failures are collected so the user sees every broken file at once.
pub fn load_from_paths<C: Mergeable>(paths: &[ConfigPath]) -> Result<C, ConfigError> {
    let mut config = C::default();
    let mut errors = Vec::new();

    for path in paths {
        let (location, loaded) = match path {
            ConfigPath::File(file_path) => (file_path, load_file::<C>(file_path)),
            ConfigPath::Dir(dir_path) => (dir_path, load_dir::<C>(dir_path)),
        };
        match loaded {
            Ok(partial) => {
                if let Err(e) = config.merge(partial) {
                    errors.push(format!("{}: {}", location.display(), e));
                }
            }
            Err(e) => errors.push(format!("{}: {}", location.display(), e)),
        }
    }

    if !errors.is_empty() {
        return Err(ConfigError::MultipleErrors { errors });
    }
    Ok(config)
}

fn load_file<C: Mergeable>(path: &Path) -> Result<C, ConfigError> {
    if !is_yaml_file(path) {
        return Err(ConfigError::UnsupportedFormat {
            path: path.to_path_buf(),
        });
    }

    let contents = std::fs::read_to_string(path).context(ReadFileSnafu)?;

    C::parse_yaml(&interpolate(&contents)?)
}

fn load_dir<C: Mergeable>(dir: &Path) -> Result<C, ConfigError> {
    let mut config = C::default();
    let mut errors = Vec::new();

    let mut files: Vec<_> = std::fs::read_dir(dir)
        .map_err(|source| ConfigError::ReadDir {
            path: dir.to_path_buf(),
            source,
        })?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_yaml_file(path))
        .collect();

    files.sort();

    for path in files {
        match load_file::<C>(&path) {
            Ok(partial) => {
                if let Err(e) = config.merge(partial) {
                    errors.push(format!("{}: {}", path.display(), e));
                }
            }
            Err(e) => errors.push(format!("{}: {}", path.display(), e)),
        }
    }

    if !errors.is_empty() {
        return Err(ConfigError::MultipleErrors { errors });
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::YamlParseSnafu;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Default, Deserialize)]
    struct TestConfig {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        items: IndexMap<String, u32>,
        #[serde(default)]
        metrics: MetricsConfig,
    }

    impl Mergeable for TestConfig {
        type Key = String;
        type Component = u32;

        fn components_mut(&mut self) -> &mut IndexMap<String, u32> {
            &mut self.items
        }

        fn metrics_mut(&mut self) -> &mut MetricsConfig {
            &mut self.metrics
        }

        fn parse_yaml(contents: &str) -> Result<Self, ConfigError> {
            serde_yaml::from_str(contents).context(YamlParseSnafu)
        }

        fn merge_settings(&mut self, other: &mut Self) {
            if other.name.is_some() {
                self.name = other.name.take();
            }
        }
    }

    #[test]
    fn test_load_dir_merges_in_name_order() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.yaml"), "name: second\nitems:\n  b: 2\n").unwrap();
        std::fs::write(dir.path().join("a.yml"), "name: first\nitems:\n  a: 1\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let config: TestConfig = load_from_paths(&[ConfigPath::dir(dir.path())]).unwrap();

        assert_eq!(config.name.as_deref(), Some("second"));
        assert_eq!(config.items.keys().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_duplicate_components_rejected() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("one.yaml");
        let second = dir.path().join("two.yaml");
        std::fs::write(&first, "items:\n  a: 1\n").unwrap();
        std::fs::write(&second, "items:\n  a: 2\n").unwrap();

        let err = load_from_paths::<TestConfig>(&[ConfigPath::file(&first), ConfigPath::file(&second)])
            .unwrap_err();

        assert!(err.to_string().contains("Duplicate component keys: a"));
    }

    #[test]
    fn test_unsupported_extension_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "name = 'x'").unwrap();

        let err = load_from_paths::<TestConfig>(&[ConfigPath::file(&path)]).unwrap_err();
        assert!(matches!(err, ConfigError::MultipleErrors { ref errors } if errors.len() == 1));
    }

    #[test]
    fn test_missing_dir_reported() {
        let err =
            load_from_paths::<TestConfig>(&[ConfigPath::dir("/nonexistent/sluice/conf.d")]).unwrap_err();
        assert!(err.to_string().contains("Failed to read directory"));
    }
}
