//! Config and playbook locations

use std::path::{Path, PathBuf};

use crate::Environment;

/// Config directory, `./engage/files` unless `ENGAGE_CONFIG_DIR` is set
pub fn default_config_dir() -> PathBuf {
    std::env::var_os("ENGAGE_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("engage").join("files"))
}

/// Playbook directory, `./engage/playbooks` unless `ENGAGE_PLAYBOOK_DIR` is set
pub fn default_playbook_dir() -> PathBuf {
    std::env::var_os("ENGAGE_PLAYBOOK_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("engage").join("playbooks"))
}

/// `<dir>/config.<environment>.yaml`
pub fn config_path(dir: &Path, environment: Environment) -> PathBuf {
    dir.join(format!("config.{}.yaml", environment.as_str()))
}

/// `<dir>/<environment>_environment.md`
pub fn environment_description_path(dir: &Path, environment: Environment) -> PathBuf {
    dir.join(format!("{}_environment.md", environment.as_str()))
}
