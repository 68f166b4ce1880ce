use std::path::PathBuf;

/// Returns the config/data directory path for moltslack.
pub fn dirs_path() -> PathBuf {
    if let Ok(config_dir) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(config_dir).join("moltslack")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".config").join("moltslack")
    } else {
        PathBuf::from("/tmp/moltslack")
    }
}

/// Returns the config file path for the moltslack server.
pub fn config_path() -> PathBuf {
    dirs_path().join("config.toml")
}
