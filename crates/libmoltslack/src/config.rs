use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::bus::{HISTORY_CAPACITY, REPLAY_LIMIT};
use crate::provider::ProviderCommands;

/// Engine-wide settings shared by every session.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct EngineConfig {
    /// Shell to run inside each PTY. Falls back to `MOLTSLACK_SHELL`, then `/bin/zsh`.
    pub shell: Option<PathBuf>,
    /// Directory used when a session is created without one.
    pub default_cwd: Option<PathBuf>,
    pub history_capacity: usize,
    pub replay_limit: usize,
    pub providers: ProviderCommands,
}

impl EngineConfig {
    /// Resolve the shell executable, preferring configured values that exist.
    pub fn resolve_shell(&self) -> PathBuf {
        let candidates = [
            self.shell.clone(),
            std::env::var_os("MOLTSLACK_SHELL").map(PathBuf::from),
            Some(PathBuf::from("/bin/zsh")),
        ];
        candidates
            .into_iter()
            .flatten()
            .find(|p| p.exists())
            .unwrap_or_else(|| PathBuf::from("/bin/sh"))
    }
}

/// Arguments that start `shell` interactively without user startup files.
pub fn shell_args(shell: &Path) -> Vec<String> {
    let name = shell
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.as_str() {
        "zsh" => vec!["-f".to_string(), "-i".to_string()],
        "bash" => vec![
            "--noprofile".to_string(),
            "--norc".to_string(),
            "-i".to_string(),
        ],
        _ => vec!["-i".to_string()],
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            shell: None,
            default_cwd: None,
            history_capacity: HISTORY_CAPACITY,
            replay_limit: REPLAY_LIMIT,
            providers: ProviderCommands::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_args_skip_startup_files() {
        assert_eq!(shell_args(Path::new("/bin/zsh")), vec!["-f", "-i"]);
        assert_eq!(
            shell_args(Path::new("/usr/local/bin/bash")),
            vec!["--noprofile", "--norc", "-i"]
        );
        assert_eq!(shell_args(Path::new("/bin/sh")), vec!["-i"]);
    }

    #[test]
    fn missing_configured_shell_falls_back() {
        let config = EngineConfig {
            shell: Some(PathBuf::from("/no/such/shell")),
            ..EngineConfig::default()
        };
        assert!(config.resolve_shell().exists());
    }

    #[test]
    fn defaults_match_bus_limits() {
        let config = EngineConfig::default();
        assert_eq!(config.history_capacity, 2000);
        assert_eq!(config.replay_limit, 500);
    }
}
