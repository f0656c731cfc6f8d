//! Layered run settings: built-in defaults < config file < `MITO_*` environment.
//! CLI flags are applied last by the binary.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use mito_llm::{LlmClient, OpenAiCompatAdapter};
use mito_tools::ToolRegistry;
use mito_types::{DetailLevel, MitoError, Result, RuntimeConfig, SeqType, ToolChain};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Project-local tool registry written by `doctor --fix`.
pub const PROJECT_REGISTRY: &str = ".mito/tools.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub base_url: Option<String>,
    pub model: Option<String>,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub max_retries: usize,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            model: None,
            api_key_env: "MITO_LLM_API_KEY".to_string(),
            timeout_secs: 60,
            max_retries: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub threads: u32,
    pub memory: String,
    pub seq_type: SeqType,
    pub detail_level: DetailLevel,
    pub max_retries: u32,
    pub tool_timeout_secs: u64,
    pub max_tool_timeout_secs: u64,
    pub annotator: Option<String>,
    pub interactive: bool,
    pub dry_run: bool,
    pub polish_short_reads: bool,
    pub tool_chain: ToolChain,
    pub tool_parameters: BTreeMap<String, BTreeMap<String, Value>>,
    /// Executable name → path, merged over the project registry.
    pub tools: BTreeMap<String, PathBuf>,
    pub llm: LlmSettings,
    pub paused_dir: Option<PathBuf>,
    /// `stage=scenario[:N]` list for simulated runs.
    pub simulation: Option<String>,
    pub rag_simulate: bool,
}

impl Default for Settings {
    fn default() -> Self {
        let config = RuntimeConfig::default();
        Self {
            threads: config.threads,
            memory: config.memory,
            seq_type: config.seq_type,
            detail_level: config.detail_level,
            max_retries: config.max_retries,
            tool_timeout_secs: config.tool_timeout_secs,
            max_tool_timeout_secs: config.max_tool_timeout_secs,
            annotator: None,
            interactive: false,
            dry_run: false,
            polish_short_reads: false,
            tool_chain: ToolChain::default(),
            tool_parameters: BTreeMap::new(),
            tools: BTreeMap::new(),
            llm: LlmSettings::default(),
            paused_dir: None,
            simulation: None,
            rag_simulate: false,
        }
    }
}

fn truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

impl Settings {
    /// Read a config file: JSON when the extension is `.json`, TOML otherwise.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| MitoError::Config(format!("cannot read {}: {e}", path.display())))?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let settings = if is_json {
            serde_json::from_str(&text)
                .map_err(|e| MitoError::Config(format!("invalid config {}: {e}", path.display())))?
        } else {
            toml::from_str(&text)
                .map_err(|e| MitoError::Config(format!("invalid config {}: {e}", path.display())))?
        };
        tracing::debug!(path = %path.display(), "Loaded settings");
        Ok(settings)
    }

    /// Overlay `MITO_*` variables read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MITO_DRY_RUN") {
            self.dry_run = truthy(&v);
        }
        if let Some(v) = lookup("MITO_SEQ_TYPE").filter(|v| !v.trim().is_empty()) {
            self.seq_type = v.parse()?;
        }
        if let Some(v) = lookup("MITO_DETAIL_LEVEL").filter(|v| !v.trim().is_empty()) {
            self.detail_level = v.parse()?;
        }
        if let Some(v) = lookup("MITO_PAUSED_DIR").filter(|v| !v.trim().is_empty()) {
            self.paused_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("MITO_RAG_SIMULATE") {
            self.rag_simulate = truthy(&v);
        }
        if let Some(v) = lookup("MITO_SIM").filter(|v| !v.trim().is_empty()) {
            self.simulation = Some(v);
        }
        Ok(())
    }

    /// Defaults, then `config` if given, then the process environment.
    pub fn resolve(config: Option<&Path>) -> Result<Self> {
        let mut settings = match config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            threads: self.threads.max(1),
            memory: self.memory.clone(),
            seq_type: self.seq_type,
            tool_chain: self.tool_chain.clone(),
            tool_parameters: self.tool_parameters.clone(),
            tool_plan: None,
            detail_level: self.detail_level,
            max_retries: self.max_retries,
            tool_timeout_secs: self.tool_timeout_secs,
            max_tool_timeout_secs: self.max_tool_timeout_secs.max(self.tool_timeout_secs),
            annotator: self.annotator.clone(),
            interactive: self.interactive,
            dry_run: self.dry_run,
            polish_short_reads: self.polish_short_reads,
        }
    }

    pub fn paused_dir(&self) -> PathBuf {
        self.paused_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("mito-forge")
                .join("paused")
        })
    }

    /// Project registry under `project_root` with the settings' entries on top.
    pub fn registry(&self, project_root: &Path) -> Result<ToolRegistry> {
        let mut registry = ToolRegistry::load(&project_root.join(PROJECT_REGISTRY))?;
        for (name, path) in &self.tools {
            registry.insert(name.clone(), path.clone());
        }
        Ok(registry.with_search_dir(project_root.join("tools").join("bin")))
    }

    /// LLM client when the configured key variable is set, otherwise a disabled one.
    pub fn llm_client<F>(&self, lookup: F) -> Arc<LlmClient>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(key) = lookup(&self.llm.api_key_env).filter(|k| !k.trim().is_empty()) else {
            tracing::debug!(var = %self.llm.api_key_env, "No LLM key; using rule-based diagnosis");
            return Arc::new(LlmClient::disabled());
        };
        let mut adapter = OpenAiCompatAdapter::new(key).with_timeout(Duration::from_secs(self.llm.timeout_secs));
        if let Some(url) = &self.llm.base_url {
            adapter = adapter.with_base_url(url.clone());
        }
        if let Some(model) = &self.llm.model {
            adapter = adapter.with_model(model.clone());
        }
        Arc::new(LlmClient::new(adapter).with_max_retries(self.llm.max_retries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_runtime_config() {
        let settings = Settings::default();
        assert_eq!(settings.runtime_config(), RuntimeConfig::default());
    }

    #[test]
    fn env_overlay() {
        let mut settings = Settings::default();
        settings
            .apply_env(env(&[
                ("MITO_DRY_RUN", "1"),
                ("MITO_SEQ_TYPE", "nanopore"),
                ("MITO_DETAIL_LEVEL", "expert"),
                ("MITO_PAUSED_DIR", "/tmp/paused"),
                ("MITO_SIM", "assembly=oom"),
                ("MITO_RAG_SIMULATE", "true"),
            ]))
            .unwrap();
        assert!(settings.dry_run);
        assert_eq!(settings.seq_type, SeqType::Ont);
        assert_eq!(settings.detail_level, DetailLevel::Expert);
        assert_eq!(settings.paused_dir(), PathBuf::from("/tmp/paused"));
        assert_eq!(settings.simulation.as_deref(), Some("assembly=oom"));
        assert!(settings.rag_simulate);
    }

    #[test]
    fn env_rejects_bad_seq_type() {
        let mut settings = Settings::default();
        let err = settings.apply_env(env(&[("MITO_SEQ_TYPE", "sanger")])).unwrap_err();
        assert!(matches!(err, MitoError::InvalidInput(_)));
    }

    #[test]
    fn falsy_dry_run_turns_it_off() {
        let mut settings = Settings {
            dry_run: true,
            ..Settings::default()
        };
        settings.apply_env(env(&[("MITO_DRY_RUN", "0")])).unwrap();
        assert!(!settings.dry_run);
    }

    #[test]
    fn loads_toml_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let toml_path = dir.path().join("mito.toml");
        std::fs::write(
            &toml_path,
            r#"
threads = 16
max_retries = 5
annotator = "geseq"

[tool_chain]
assembly = "unicycler"

[tool_parameters.spades]
"--careful" = true

[llm]
model = "local-model"
"#,
        )
        .unwrap();
        let settings = Settings::load(&toml_path).unwrap();
        assert_eq!(settings.threads, 16);
        assert_eq!(settings.max_retries, 5);
        assert_eq!(settings.tool_chain.assembly.as_deref(), Some("unicycler"));
        assert_eq!(settings.tool_parameters["spades"]["--careful"], Value::Bool(true));
        assert_eq!(settings.llm.model.as_deref(), Some("local-model"));
        assert_eq!(settings.llm.api_key_env, "MITO_LLM_API_KEY");

        let json_path = dir.path().join("mito.json");
        std::fs::write(&json_path, r#"{"seq_type": "pacbio-hifi", "polish_short_reads": true}"#).unwrap();
        let settings = Settings::load(&json_path).unwrap();
        assert_eq!(settings.seq_type, SeqType::PacbioHifi);
        assert!(settings.polish_short_reads);
        assert_eq!(settings.threads, RuntimeConfig::default().threads);
    }

    #[test]
    fn bad_config_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mito.toml");
        std::fs::write(&path, "threads = \"many\"").unwrap();
        assert!(matches!(Settings::load(&path), Err(MitoError::Config(_))));
    }

    #[test]
    fn llm_client_needs_a_key() {
        let settings = Settings::default();
        assert!(!settings.llm_client(env(&[])).is_available());
        assert!(settings.llm_client(env(&[("MITO_LLM_API_KEY", "sk-test")])).is_available());
    }

    #[test]
    fn registry_merges_settings_entries() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("my-spades");
        std::fs::write(&exe, "#!/bin/sh\n").unwrap();
        let mut settings = Settings::default();
        settings.tools.insert("mito-test-spades".into(), exe.clone());
        let registry = settings.registry(dir.path()).unwrap();
        assert_eq!(registry.resolve("mito-test-spades"), Some(exe));
    }
}
