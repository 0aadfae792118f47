use anyhow::{bail, Context, Result};
use photomatch_core::pipeline::DEFAULT_REFERENCE_JITTERS;
use photomatch_core::{ARCFACE_MODEL_FILE, DEFAULT_TOLERANCE, SCRFD_MODEL_FILE};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// CLI configuration: defaults, then a TOML file, then `PHOTOMATCH_*`
/// environment variables. Command-line flags are applied last through
/// [`Config::apply_overrides`].
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Euclidean distance tolerance for a positive match.
    pub tolerance: f32,
    /// Extra jitter passes averaged into the reference embedding.
    pub reference_jitters: usize,
    /// Extra jitter passes averaged into each candidate embedding.
    pub candidate_jitters: usize,
    /// ONNX Runtime intra-op threads per session.
    pub intra_threads: usize,
    /// Descend into subdirectories of candidate folders.
    pub recursive: bool,
}

/// On-disk form of [`Config`]; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    model_dir: Option<PathBuf>,
    tolerance: Option<f32>,
    reference_jitters: Option<usize>,
    candidate_jitters: Option<usize>,
    intra_threads: Option<usize>,
    recursive: Option<bool>,
}

/// Command-line overrides, the last configuration layer.
#[derive(Debug, Default, Clone, Copy)]
pub struct Overrides {
    pub tolerance: Option<f32>,
    pub reference_jitters: Option<usize>,
    pub candidate_jitters: Option<usize>,
    pub recursive: Option<bool>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_dir: photomatch_core::default_model_dir(),
            tolerance: DEFAULT_TOLERANCE,
            reference_jitters: DEFAULT_REFERENCE_JITTERS,
            candidate_jitters: 0,
            intra_threads: 2,
            recursive: false,
        }
    }
}

impl Config {
    /// Load configuration from `path` (or the default config file if it
    /// exists), then apply environment overrides.
    ///
    /// Not validated: callers apply command-line flags first, then call
    /// [`Config::validate`].
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    fn load_with(path: Option<&Path>, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        let file = match path {
            Some(p) => Some(p.to_path_buf()),
            None => default_config_path().filter(|p| p.is_file()),
        };
        if let Some(file) = file {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read config file {}", file.display()))?;
            config
                .merge_toml(&text)
                .with_context(|| format!("invalid config file {}", file.display()))?;
            tracing::debug!(path = %file.display(), "config file loaded");
        }

        config.apply_env(lookup);
        Ok(config)
    }

    fn merge_toml(&mut self, text: &str) -> Result<()> {
        let file: ConfigFile = toml::from_str(text)?;
        if let Some(v) = file.model_dir {
            self.model_dir = v;
        }
        if let Some(v) = file.tolerance {
            self.tolerance = v;
        }
        if let Some(v) = file.reference_jitters {
            self.reference_jitters = v;
        }
        if let Some(v) = file.candidate_jitters {
            self.candidate_jitters = v;
        }
        if let Some(v) = file.intra_threads {
            self.intra_threads = v;
        }
        if let Some(v) = file.recursive {
            self.recursive = v;
        }
        Ok(())
    }

    /// Apply `PHOTOMATCH_*` overrides. Unparsable values are logged and ignored.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("PHOTOMATCH_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Some(v) = env_parse(&lookup, "PHOTOMATCH_TOLERANCE") {
            self.tolerance = v;
        }
        if let Some(v) = env_parse(&lookup, "PHOTOMATCH_REFERENCE_JITTERS") {
            self.reference_jitters = v;
        }
        if let Some(v) = env_parse(&lookup, "PHOTOMATCH_CANDIDATE_JITTERS") {
            self.candidate_jitters = v;
        }
        if let Some(v) = env_parse(&lookup, "PHOTOMATCH_INTRA_THREADS") {
            self.intra_threads = v;
        }
        if let Some(v) = lookup("PHOTOMATCH_RECURSIVE") {
            self.recursive = !matches!(v.trim(), "0" | "false" | "no" | "");
        }
    }

    /// Apply command-line overrides. Only flags that were given replace
    /// the file and environment values.
    pub fn apply_overrides(&mut self, overrides: Overrides) {
        if let Some(v) = overrides.tolerance {
            self.tolerance = v;
        }
        if let Some(v) = overrides.reference_jitters {
            self.reference_jitters = v;
        }
        if let Some(v) = overrides.candidate_jitters {
            self.candidate_jitters = v;
        }
        if let Some(v) = overrides.recursive {
            self.recursive = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            bail!("tolerance must be a positive number, got {}", self.tolerance);
        }
        if self.intra_threads == 0 {
            bail!("intra_threads must be at least 1");
        }
        Ok(())
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join(SCRFD_MODEL_FILE)
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> PathBuf {
        self.model_dir.join(ARCFACE_MODEL_FILE)
    }
}

/// `$XDG_CONFIG_HOME/photomatch/config.toml`, falling back to `~/.config`.
fn default_config_path() -> Option<PathBuf> {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|_| std::env::var("HOME").map(|home| PathBuf::from(home).join(".config")))
        .ok()?;
    Some(base.join("photomatch").join("config.toml"))
}

fn env_parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}
