//! Project-local tool registry: executable name → absolute path.
//!
//! Resolution order is the system `PATH` first, then registered entries, then
//! extra search directories (for example a project `tools/bin`).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use mito_types::{MitoError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolRegistry {
    #[serde(default)]
    tools: BTreeMap<String, PathBuf>,
    #[serde(skip)]
    search_dirs: Vec<PathBuf>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.insert(name, path);
        self
    }

    pub fn with_search_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_dirs.push(dir.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, path: impl Into<PathBuf>) {
        self.tools.insert(name.into(), path.into());
    }

    /// Merge another registry's entries over this one.
    pub fn extend(&mut self, other: ToolRegistry) {
        self.tools.extend(other.tools);
        self.search_dirs.extend(other.search_dirs);
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.tools.iter().map(|(k, v)| (k.as_str(), v.as_path()))
    }

    /// Locate `exe`. Paths containing a separator are taken as-is if they are executable.
    pub fn resolve(&self, exe: &str) -> Option<PathBuf> {
        if exe.contains(std::path::MAIN_SEPARATOR) {
            let path = PathBuf::from(exe);
            return is_executable(&path).then_some(path);
        }
        if let Ok(found) = which::which(exe) {
            return Some(found);
        }
        if let Some(path) = self.tools.get(exe).filter(|p| is_executable(p)) {
            return Some(path.clone());
        }
        self.search_dirs
            .iter()
            .map(|dir| dir.join(exe))
            .find(|candidate| is_executable(candidate))
    }

    /// Load a registry file. A missing file yields an empty registry.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| {
            MitoError::Config(format!("invalid tool registry {}: {e}", path.display()))
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self)
            .map_err(|e| MitoError::Config(format!("cannot encode tool registry: {e}")))?;
        std::fs::write(path, text)?;
        tracing::debug!(path = %path.display(), entries = self.tools.len(), "Tool registry saved");
        Ok(())
    }
}

/// A regular file the current user may execute.
pub fn is_executable(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn non_executable_entry_is_not_resolved() {
        let dir = tempfile::tempdir().unwrap();
        let exe = touch(dir.path(), "mito-fake-polisher");
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o644)).unwrap();

        let registry = ToolRegistry::new()
            .with_entry("mito-fake-polisher", &exe)
            .with_search_dir(dir.path());
        assert_eq!(registry.resolve("mito-fake-polisher"), None);
        assert_eq!(registry.resolve(exe.to_str().unwrap()), None);
    }

    #[test]
    fn resolves_from_path() {
        let registry = ToolRegistry::new();
        assert!(registry.resolve("sh").is_some());
    }

    #[test]
    fn resolves_registered_entry() {
        let dir = tempfile::tempdir().unwrap();
        let exe = touch(dir.path(), "mito-fake-assembler");
        let registry = ToolRegistry::new().with_entry("mito-fake-assembler", &exe);
        assert_eq!(registry.resolve("mito-fake-assembler"), Some(exe));
    }

    #[test]
    fn resolves_from_search_dir() {
        let dir = tempfile::tempdir().unwrap();
        let exe = touch(dir.path(), "mito-fake-qc");
        let registry = ToolRegistry::new().with_search_dir(dir.path());
        assert_eq!(registry.resolve("mito-fake-qc"), Some(exe));
    }

    #[test]
    fn unresolvable_returns_none() {
        let registry = ToolRegistry::new().with_entry("ghost", "/nonexistent/ghost");
        assert_eq!(registry.resolve("ghost"), None);
        assert_eq!(registry.resolve("/nonexistent/bin/tool"), None);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".mito/tools.toml");
        let registry = ToolRegistry::new().with_entry("flye", "/opt/flye/bin/flye");
        registry.save(&path).unwrap();

        let loaded = ToolRegistry::load(&path).unwrap();
        assert_eq!(loaded, registry);
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("[tools]"));
    }

    #[test]
    fn load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = ToolRegistry::load(&dir.path().join("none.toml")).unwrap();
        assert_eq!(loaded.entries().count(), 0);
    }

    #[test]
    fn load_rejects_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "tools = [").unwrap();
        assert!(matches!(ToolRegistry::load(&path), Err(MitoError::Config(_))));
    }
}
