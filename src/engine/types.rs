use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineDiag {
    pub python_exe: String,
    pub python_version: Option<String>,
    pub entrypoint: Option<String>,
    pub weights_dir: String,
    pub weights_present: bool,
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
}
