//! Cluster identifier.
//!
//! A cluster names one watched input directory and its bronze table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Cluster name used for files whose directory matches no cluster.
pub const UNKNOWN_CLUSTER: &str = "unknown";

/// Identifier for a cluster in sluice configuration.
///
/// ```
/// use sluice::config::ClusterKey;
///
/// let key = ClusterKey::new("diabetes");
/// assert_eq!(key.id(), "diabetes");
/// assert_eq!(key.table_name(), "diabetes_bronze");
/// ```
#[derive(Debug, Clone, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterKey(String);

impl ClusterKey {
    /// Create a new cluster key from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The fallback key for unattributable files.
    pub fn unknown() -> Self {
        Self::new(UNKNOWN_CLUSTER)
    }

    /// Get the underlying identifier string.
    pub fn id(&self) -> &str {
        &self.0
    }

    /// Name of the bronze table directory for this cluster.
    pub fn table_name(&self) -> String {
        format!("{}_bronze", self.0)
    }

    /// Recover the cluster from a bronze table directory name.
    ///
    /// Returns `None` unless the name ends in `_bronze` with a non-empty stem.
    pub fn from_table_dir(dir: &Path) -> Option<Self> {
        let name = dir.file_name()?.to_str()?;
        let stem = name.strip_suffix("_bronze")?;
        (!stem.is_empty()).then(|| Self::new(stem))
    }
}

impl fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ClusterKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ClusterKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_round_trip() {
        let key = ClusterKey::new("renda_extra");
        let dir = Path::new("/data/bronze").join(key.table_name());
        assert_eq!(ClusterKey::from_table_dir(&dir), Some(key));
    }

    #[test]
    fn test_from_table_dir_rejects_other_names() {
        assert_eq!(ClusterKey::from_table_dir(Path::new("/data/bronze/_bronze")), None);
        assert_eq!(ClusterKey::from_table_dir(Path::new("/data/bronze/silver")), None);
    }

    #[test]
    fn test_serde_transparent() {
        let key: ClusterKey = serde_yaml::from_str("diabetes").unwrap();
        assert_eq!(key.id(), "diabetes");
        assert_eq!(serde_yaml::to_string(&key).unwrap().trim(), "diabetes");
    }
}
