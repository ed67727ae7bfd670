use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

/// Configuration file name, looked up in the project root.
pub const CONFIG_FILE: &str = "callmap.toml";

/// Default database filename, stored in the project root.
pub const DB_FILE: &str = ".callmap.db";

/// Configuration loaded from `callmap.toml` at the project root.
///
/// Every section is optional; missing keys fall back to the defaults below.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub project: ProjectConfig,
    pub watch: WatchSettings,
    pub enrichment: EnrichmentSettings,
    pub planner: PlannerSettings,
    pub rag: RagSettings,
    pub llm: LlmSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// SQLite database path, relative to the project root unless absolute.
    pub db_path: String,
    /// Appended to relative import specifiers that carry no recognized extension.
    pub default_extension: String,
    /// Source extensions that are parsed and watched.
    pub extensions: Vec<String>,
    /// Extra directory names to skip, on top of the built-in ignore list.
    pub ignore: Vec<String>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            db_path: DB_FILE.to_string(),
            default_extension: "ts".to_string(),
            extensions: ["ts", "tsx", "mts", "cts", "js", "jsx", "mjs", "cjs"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ignore: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchSettings {
    pub debounce_ms: u64,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self { debounce_ms: 500 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnrichmentSettings {
    pub enabled: bool,
    pub tick_ms: u64,
    pub queue_capacity: usize,
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_ms: 1000,
            queue_capacity: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlannerSettings {
    pub max_attempts: u32,
    pub max_rows: usize,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            max_rows: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RagSettings {
    pub top_k: usize,
    pub rerank: bool,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            top_k: 10,
            rerank: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// Ollama endpoint, e.g. "localhost:11434".
    pub host: String,
    pub model: String,
    pub timeout_ms: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            host: "localhost:11434".to_string(),
            model: "llama3.2".to_string(),
            timeout_ms: 60_000,
        }
    }
}

impl Config {
    /// Load `callmap.toml` from `root`, then apply `CALLMAP_*` env overrides.
    ///
    /// A missing file yields defaults. A malformed file is reported and also yields defaults.
    pub fn load(root: &Path) -> Self {
        let config_path = root.join(CONFIG_FILE);

        let mut config = if !config_path.exists() {
            Self::default()
        } else {
            match std::fs::read_to_string(&config_path) {
                Ok(contents) => Self::parse(&contents).unwrap_or_else(|err| {
                    warn!(file = %config_path.display(), error = %err, "invalid config, using defaults");
                    Self::default()
                }),
                Err(err) => {
                    warn!(file = %config_path.display(), error = %err, "cannot read config, using defaults");
                    Self::default()
                }
            }
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.normalize();
        config
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        let mut config: Self = toml::from_str(contents)?;
        config.normalize();
        Ok(config)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(db) = lookup("CALLMAP_DB") {
            self.project.db_path = db;
        }
        if let Some(host) = lookup("CALLMAP_OLLAMA_HOST") {
            self.llm.host = host;
        }
        if let Some(model) = lookup("CALLMAP_OLLAMA_MODEL") {
            self.llm.model = model;
        }
    }

    fn normalize(&mut self) {
        self.project.default_extension = self
            .project
            .default_extension
            .trim_start_matches('.')
            .to_string();
        for ext in &mut self.project.extensions {
            *ext = ext.trim_start_matches('.').to_string();
        }
        self.planner.max_attempts = self.planner.max_attempts.max(1);
        self.enrichment.queue_capacity = self.enrichment.queue_capacity.max(1);
        self.enrichment.tick_ms = self.enrichment.tick_ms.max(1);
    }

    /// Database location resolved against the project root.
    pub fn db_path(&self, root: &Path) -> std::path::PathBuf {
        let p = Path::new(&self.project.db_path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            root.join(p)
        }
    }
}

impl WatchSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl EnrichmentSettings {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

impl LlmSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
