//! Content-addressed build layers
//!
//! Every pipeline stage produces one layer under the build root. A layer's
//! output is reused if and only if its input fingerprint matches the last
//! successful build of that stage.
//!
//! # Layer States
//!
//! | State | Reusable | Description |
//! |-------|----------|-------------|
//! | Building | no | In progress or crashed |
//! | Complete | yes | Finalized, immutable |

pub mod fingerprint;
pub mod store;

pub use fingerprint::Fingerprinter;
pub use store::{BuildState, LayerStore, LayerWork};

use crate::pipeline::Stage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// State of a recorded layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerState {
    /// Work started but never committed
    Building,
    /// Committed and immutable
    Complete,
}

impl fmt::Display for LayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Building => write!(f, "building"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

/// A recorded build layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildLayer {
    /// Pipeline stage that produced the layer
    pub stage: Stage,
    /// Input fingerprint (full hex)
    pub fingerprint: String,
    /// Output directory
    pub output: PathBuf,
    /// Current state
    pub state: LayerState,
    /// When the layer was (last) started
    pub created_at: DateTime<Utc>,
}

impl BuildLayer {
    /// Directory name for a stage's output with the given fingerprint
    pub fn dir_name(stage: Stage, fingerprint: &str) -> String {
        format!("{}-{}", stage, &fingerprint[..12.min(fingerprint.len())])
    }

    /// First 12 hex chars of the fingerprint
    pub fn short_fingerprint(&self) -> &str {
        &self.fingerprint[..12.min(self.fingerprint.len())]
    }

    /// Whether this record can satisfy a build with `fingerprint`
    pub fn is_reusable_for(&self, fingerprint: &str) -> bool {
        self.state == LayerState::Complete
            && self.fingerprint == fingerprint
            && self.output.is_dir()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn layer(output: PathBuf, state: LayerState) -> BuildLayer {
        BuildLayer {
            stage: Stage::Dependencies,
            fingerprint: "a1b2c3d4e5f6a7b8".to_string(),
            output,
            state,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn dir_name_uses_short_fingerprint() {
        assert_eq!(
            BuildLayer::dir_name(Stage::Source, "0123456789abcdef"),
            "source-0123456789ab"
        );
    }

    #[test]
    fn complete_layer_with_output_is_reusable() {
        let dir = TempDir::new().unwrap();
        let l = layer(dir.path().to_path_buf(), LayerState::Complete);
        assert!(l.is_reusable_for("a1b2c3d4e5f6a7b8"));
        assert!(!l.is_reusable_for("ffffffffffffffff"));
    }

    #[test]
    fn building_layer_is_never_reusable() {
        let dir = TempDir::new().unwrap();
        let l = layer(dir.path().to_path_buf(), LayerState::Building);
        assert!(!l.is_reusable_for("a1b2c3d4e5f6a7b8"));
    }

    #[test]
    fn missing_output_is_not_reusable() {
        let dir = TempDir::new().unwrap();
        let l = layer(dir.path().join("gone"), LayerState::Complete);
        assert!(!l.is_reusable_for("a1b2c3d4e5f6a7b8"));
    }

    #[test]
    fn layer_state_serializes_lowercase() {
        let json = serde_json::to_string(&LayerState::Complete).unwrap();
        assert_eq!(json, "\"complete\"");
    }
}
