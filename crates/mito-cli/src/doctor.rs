//! Executable checks for `mito doctor`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use mito_tools::{catalog, is_executable, lookup, ToolRegistry};

/// How deep `--fix` descends below each search root (`tools/bin/<name>/<version>/<exe>`).
const SEARCH_DEPTH: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub exe: String,
    /// Catalog tool that needs the executable, if any.
    pub tool: Option<&'static str>,
    pub install_hint: Option<&'static str>,
}

#[derive(Debug, Default)]
pub struct Report {
    pub present: BTreeMap<String, PathBuf>,
    pub missing: Vec<Requirement>,
}

/// Executables to check for `--tools a,b` (catalog ids or raw names), or the whole catalog.
pub fn requirements(tools: Option<&str>) -> Vec<Requirement> {
    let mut by_exe: BTreeMap<String, Requirement> = BTreeMap::new();
    let mut add = |exe: &str, tool: Option<&'static str>, hint: Option<&'static str>| {
        by_exe.entry(exe.to_string()).or_insert(Requirement {
            exe: exe.to_string(),
            tool,
            install_hint: hint,
        });
    };

    match tools {
        Some(list) => {
            for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                match lookup(name) {
                    Some(spec) => {
                        for exe in spec.executables() {
                            add(exe, Some(spec.id), Some(spec.install_hint));
                        }
                    }
                    None => add(name, None, None),
                }
            }
        }
        None => {
            for spec in catalog::all() {
                for exe in spec.executables() {
                    add(exe, Some(spec.id), Some(spec.install_hint));
                }
            }
        }
    }
    by_exe.into_values().collect()
}

pub fn check(registry: &ToolRegistry, requirements: Vec<Requirement>) -> Report {
    let mut report = Report::default();
    for req in requirements {
        match registry.resolve(&req.exe) {
            Some(path) => {
                report.present.insert(req.exe, path);
            }
            None => report.missing.push(req),
        }
    }
    report
}

/// Conda prefixes and the project tool directory, in search order.
pub fn search_roots(project_root: &Path, conda_prefix: Option<PathBuf>, home: Option<PathBuf>) -> Vec<PathBuf> {
    let mut roots = Vec::new();
    if let Some(prefix) = conda_prefix {
        roots.push(prefix.join("bin"));
    }
    if let Some(home) = home {
        for dist in ["miniconda3", "anaconda3", "miniforge3", "mambaforge"] {
            let base = home.join(dist);
            roots.push(base.join("bin"));
            roots.push(base.join("envs"));
        }
    }
    roots.push(PathBuf::from("/opt/conda/bin"));
    roots.push(project_root.join("tools").join("bin"));
    roots
}

/// First executable file named `exe` in `dir` or below it, at most `depth` levels down.
pub fn find_executable(dir: &Path, exe: &str, depth: usize) -> Option<PathBuf> {
    let candidate = dir.join(exe);
    if is_executable(&candidate) {
        return Some(candidate);
    }
    if depth == 0 {
        return None;
    }
    let mut subdirs: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    subdirs.sort();
    subdirs
        .iter()
        .find_map(|sub| find_executable(sub, exe, depth - 1))
}

/// Look for each missing executable under `roots`. Hits are inserted into `registry`.
pub fn fix(registry: &mut ToolRegistry, missing: &[Requirement], roots: &[PathBuf]) -> Vec<(String, PathBuf)> {
    let mut found = Vec::new();
    for req in missing {
        let hit = roots
            .iter()
            .filter(|root| root.is_dir())
            .find_map(|root| find_executable(root, &req.exe, SEARCH_DEPTH));
        if let Some(path) = hit {
            tracing::info!(exe = %req.exe, path = %path.display(), "Found missing tool");
            registry.insert(req.exe.clone(), path.clone());
            found.push((req.exe.clone(), path));
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn requirements_expand_catalog_tools() {
        let reqs = requirements(Some("pilon, not-in-catalog"));
        let exes: Vec<&str> = reqs.iter().map(|r| r.exe.as_str()).collect();
        assert!(exes.contains(&"bwa"));
        assert!(exes.contains(&"samtools"));
        assert!(exes.contains(&"not-in-catalog"));
        let raw = reqs.iter().find(|r| r.exe == "not-in-catalog").unwrap();
        assert_eq!(raw.tool, None);
    }

    #[test]
    fn full_catalog_has_no_duplicates() {
        let reqs = requirements(None);
        let mut exes: Vec<&str> = reqs.iter().map(|r| r.exe.as_str()).collect();
        let before = exes.len();
        exes.dedup();
        assert_eq!(before, exes.len());
        assert!(exes.contains(&"spades.py"));
        assert!(!exes.contains(&"geseq"));
    }

    #[test]
    fn fix_finds_nested_tool_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("tools/bin/fakeqc/v1/fakeqc");
        touch(&exe);

        let missing = vec![Requirement {
            exe: "fakeqc".into(),
            tool: None,
            install_hint: None,
        }];
        let roots = search_roots(dir.path(), None, None);
        let mut registry = ToolRegistry::new();
        let found = fix(&mut registry, &missing, &roots);

        assert_eq!(found, vec![("fakeqc".to_string(), exe.clone())]);
        assert_eq!(registry.entries().next(), Some(("fakeqc", exe.as_path())));
    }

    #[test]
    fn search_stops_at_depth() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a/b/c/d/deep"));
        assert_eq!(find_executable(dir.path(), "deep", 3), None);
        assert!(find_executable(dir.path(), "deep", 4).is_some());
    }

    #[test]
    fn search_skips_files_without_execute_bit() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("a/fakeqc");
        touch(&plain);
        std::fs::set_permissions(&plain, std::fs::Permissions::from_mode(0o644)).unwrap();
        let exe = dir.path().join("b/fakeqc");
        touch(&exe);
        assert_eq!(find_executable(dir.path(), "fakeqc", 1), Some(exe));
    }

    #[test]
    fn conda_prefix_searched_first() {
        let roots = search_roots(Path::new("/proj"), Some("/env".into()), Some("/home/u".into()));
        assert_eq!(roots[0], PathBuf::from("/env/bin"));
        assert_eq!(roots.last(), Some(&PathBuf::from("/proj/tools/bin")));
    }
}
