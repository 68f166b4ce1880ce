use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::MoltError;

/// External assistant CLIs a task can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Claude,
    Codex,
}

/// Output conventions a provider's JSON stream follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFamily {
    /// `assistant` events are intermediate thoughts; only `result` is the answer.
    StreamJson,
    /// Item/message events carry the answer; `*error*` types surface as errors.
    ItemEvents,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Claude => "claude",
            Provider::Codex => "codex",
        }
    }

    pub fn family(&self) -> ProviderFamily {
        match self {
            Provider::Claude => ProviderFamily::StreamJson,
            Provider::Codex => ProviderFamily::ItemEvents,
        }
    }

    /// Arguments for a non-interactive, JSON-streaming run of `prompt`.
    pub fn args(&self, prompt: &str) -> Vec<String> {
        match self {
            Provider::Claude => vec![
                "-p".to_string(),
                prompt.to_string(),
                "--no-session-persistence".to_string(),
                "--output-format".to_string(),
                "stream-json".to_string(),
                "--verbose".to_string(),
            ],
            Provider::Codex => vec!["exec".to_string(), "--json".to_string(), prompt.to_string()],
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = MoltError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "claude" => Ok(Provider::Claude),
            "codex" => Ok(Provider::Codex),
            _ => Err(MoltError::UnsupportedProvider(raw.trim().to_string())),
        }
    }
}

/// Executable used for each provider.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ProviderCommands {
    pub claude: PathBuf,
    pub codex: PathBuf,
}

impl ProviderCommands {
    pub fn program(&self, provider: Provider) -> &PathBuf {
        match provider {
            Provider::Claude => &self.claude,
            Provider::Codex => &self.codex,
        }
    }
}

impl Default for ProviderCommands {
    fn default() -> Self {
        Self {
            claude: PathBuf::from("claude"),
            codex: PathBuf::from("codex"),
        }
    }
}
