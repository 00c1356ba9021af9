//! Coordinator configuration (the `[coordinator]` table of `ferry.toml`).

use std::path::PathBuf;

use ferry_protocol::constants::MAX_BODY_SIZE;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Socket address the HTTP server binds to.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Directory holding transfer records, chunks and assembled files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Largest accepted request body in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_bind() -> String {
    "0.0.0.0:5000".into()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("ferry-data")
}

fn default_max_body_bytes() -> usize {
    MAX_BODY_SIZE
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            data_dir: default_data_dir(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}
