use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Configuration of one embedded child view, attached to a field in the
/// parent display. Produced externally (admin surface), immutable during a
/// render pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChildEmbedConfig {
    /// Name of the child view to embed. Empty means not configured.
    #[serde(default)]
    pub view: String,

    /// Display of the child view to use.
    #[serde(default = "default_display")]
    pub display: String,

    /// Token string supplying the child's positional filter arguments.
    #[serde(default)]
    pub arguments: String,

    /// Collect argument values across all parent rows and run one batched
    /// child query instead of one per row.
    #[serde(default)]
    pub aggregate: bool,

    /// Render nothing when the child produces no rows.
    #[serde(default)]
    pub hide_empty: bool,
}

fn default_display() -> String {
    "default".to_string()
}

impl Default for ChildEmbedConfig {
    fn default() -> Self {
        ChildEmbedConfig {
            view: String::new(),
            display: default_display(),
            arguments: String::new(),
            aggregate: false,
            hide_empty: false,
        }
    }
}

impl ChildEmbedConfig {
    /// Parse a config from its YAML form.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}
