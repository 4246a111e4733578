// Laminate layer builder.

//! Overridable external tool names.
//!
//! Production deployments sometimes vendor a renamed or wrapped archiver
//! (e.g. a `mksquashfs` built with non-default compressors); everything here
//! defaults to the bare tool name, resolved against `PATH` at call time.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerConfig {
    pub mksquashfs: String,
    pub unsquashfs: String,
    pub squashtool: String,
}

impl Default for LayerConfig {
    fn default() -> LayerConfig {
        LayerConfig {
            mksquashfs: "mksquashfs".to_string(),
            unsquashfs: "unsquashfs".to_string(),
            squashtool: "squashtool".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_bare_tool_names() {
        let config = LayerConfig::default();
        assert_eq!(config.mksquashfs, "mksquashfs");
        assert_eq!(config.unsquashfs, "unsquashfs");
        assert_eq!(config.squashtool, "squashtool");
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config: LayerConfig = serde_json::from_str(r#"{"mksquashfs": "mksquashfs-xz"}"#).unwrap();
        assert_eq!(config.mksquashfs, "mksquashfs-xz");
        assert_eq!(config.unsquashfs, "unsquashfs");
    }
}
