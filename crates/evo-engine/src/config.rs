use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Local,
    Docker,
    DockerPersistent,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Local => "local",
            Backend::Docker => "docker",
            Backend::DockerPersistent => "docker_persistent",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "local" => Ok(Backend::Local),
            "docker" => Ok(Backend::Docker),
            "docker_persistent" | "docker-persistent" => Ok(Backend::DockerPersistent),
            other => Err(anyhow!("unknown_backend: {}", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkMode {
    None,
    Bridge,
}

impl NetworkMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkMode::None => "none",
            NetworkMode::Bridge => "bridge",
        }
    }
}

pub const DEFAULT_IMAGE: &str = "evo-runner:py312";

/// One engine invocation's full configuration. Built once, immutable after.
#[derive(Clone, Debug, Serialize)]
pub struct RunConfig {
    pub backend: Backend,
    pub cpus: f64,
    pub mem_mb: u64,
    pub network: NetworkMode,
    pub timeout_s: u64,
    pub rounds: u32,
    pub repeats: u32,
    pub recipes: Vec<String>,
    pub input_dir: PathBuf,
    pub expected_path: PathBuf,
    pub workdir: PathBuf,
    pub image: String,
    /// Interpreter + program file, run from the workdir; the input directory
    /// is appended as the final argument.
    pub entry_command: Vec<String>,
}

impl RunConfig {
    /// The recipe list used when the caller does not supply one.
    pub fn default_recipes() -> Vec<String> {
        [
            "multiprocessing_sizes",
            "threaded_stat",
            "use_scandir",
            "threaded_fetch",
            "add_retry_headers",
            "disk_cache",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    pub fn default_entry_command() -> Vec<String> {
        vec!["python".to_string(), "-u".to_string(), "main.py".to_string()]
    }

    pub fn new(input_dir: PathBuf, expected_path: PathBuf, workdir: PathBuf) -> Self {
        RunConfig {
            backend: Backend::Docker,
            cpus: 1.0,
            mem_mb: 256,
            network: NetworkMode::None,
            timeout_s: 15,
            rounds: 2,
            repeats: 1,
            recipes: Self::default_recipes(),
            input_dir,
            expected_path,
            workdir,
            image: DEFAULT_IMAGE.to_string(),
            entry_command: Self::default_entry_command(),
        }
    }

    /// Resolve the path fields to absolute form. The input directory and the
    /// expected transcript must exist; the workdir is created on demand later.
    pub fn resolved(mut self) -> Result<Self> {
        self.input_dir = self
            .input_dir
            .canonicalize()
            .with_context(|| format!("input_dir not found: {}", self.input_dir.display()))?;
        self.expected_path = self
            .expected_path
            .canonicalize()
            .with_context(|| format!("expected file not found: {}", self.expected_path.display()))?;
        if !self.workdir.is_absolute() {
            self.workdir = std::env::current_dir()?.join(&self.workdir);
        }
        self.workdir = evo_core::normalize_path(&self.workdir);
        Ok(self)
    }

    pub fn apply_overrides(&mut self, ov: ConfigOverrides) -> Result<()> {
        if let Some(backend) = ov.backend {
            self.backend = Backend::parse(&backend)?;
        }
        if let Some(cpus) = ov.cpus {
            self.cpus = cpus;
        }
        if let Some(mem_mb) = ov.mem_mb {
            self.mem_mb = mem_mb;
        }
        if let Some(allow_net) = ov.allow_net {
            self.network = if allow_net {
                NetworkMode::Bridge
            } else {
                NetworkMode::None
            };
        }
        if let Some(timeout_s) = ov.timeout_s {
            self.timeout_s = timeout_s;
        }
        if let Some(rounds) = ov.rounds {
            self.rounds = rounds;
        }
        if let Some(repeats) = ov.repeats {
            self.repeats = repeats;
        }
        if let Some(recipes) = ov.recipes {
            self.recipes = recipes;
        }
        if let Some(image) = ov.image {
            self.image = image;
        }
        if let Some(entry_command) = ov.entry_command {
            if entry_command.is_empty() {
                return Err(anyhow!("invalid_config: entry_command cannot be empty"));
            }
            self.entry_command = entry_command;
        }
        Ok(())
    }
}

/// Optional YAML overrides file. Absent keys leave the base config untouched.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigOverrides {
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub cpus: Option<f64>,
    #[serde(default)]
    pub mem_mb: Option<u64>,
    #[serde(default)]
    pub allow_net: Option<bool>,
    #[serde(default)]
    pub timeout_s: Option<u64>,
    #[serde(default)]
    pub rounds: Option<u32>,
    #[serde(default)]
    pub repeats: Option<u32>,
    #[serde(default)]
    pub recipes: Option<Vec<String>>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub entry_command: Option<Vec<String>>,
}

pub fn load_overrides(path: &Path) -> Result<ConfigOverrides> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("config file not found: {}", path.display()))?;
    let overrides: ConfigOverrides = serde_yaml::from_str(&text)
        .with_context(|| format!("invalid config file: {}", path.display()))?;
    Ok(overrides)
}
