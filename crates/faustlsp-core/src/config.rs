//! Per-project configuration, loaded from `.faustcfg.json` at the
//! workspace root.
//!
//! Absence of the file, or a file that fails to parse, falls back to the
//! defaults: compile with `faust`, every `.dsp` file is its own process
//! named `process`, compiler diagnostics on.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Name of the project configuration file.
pub const CONFIG_FILE_NAME: &str = ".faustcfg.json";

/// How the project is compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectKind {
    #[default]
    Process,
    /// Reserved: compile as a library without a top-level process.
    Library,
}

/// Contents of `.faustcfg.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Compiler executable name or path.
    pub command: String,

    #[serde(rename = "type")]
    pub kind: ProjectKind,

    /// Value passed to the compiler as `-pn`.
    pub process_name: String,

    /// Workspace-relative files whose top level is a process. Empty means
    /// every `.dsp` file.
    pub process_files: Vec<PathBuf>,

    /// Extra include directories. Reserved.
    pub include: Vec<PathBuf>,

    /// Whether compiler diagnostics are published.
    pub compiler_diagnostics: bool,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        ProjectConfig {
            command: "faust".to_string(),
            kind: ProjectKind::Process,
            process_name: "process".to_string(),
            process_files: Vec::new(),
            include: Vec::new(),
            compiler_diagnostics: true,
        }
    }
}

impl ProjectConfig {
    /// Loads the configuration from `root`, falling back to defaults when
    /// the file is absent or malformed.
    pub fn load(root: &Path) -> ProjectConfig {
        let path = root.join(CONFIG_FILE_NAME);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(_) => return ProjectConfig::default(),
        };
        match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(err) => {
                log::error!("invalid {}: {err}", path.display());
                ProjectConfig::default()
            }
        }
    }

    /// Whether `path` (absolute) is compiled as a top-level process.
    pub fn is_process_file(&self, root: &Path, path: &Path) -> bool {
        if self.process_files.is_empty() {
            return path.extension().is_some_and(|ext| ext == "dsp");
        }
        self.process_files.iter().any(|rel| root.join(rel) == path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = ProjectConfig::default();
        assert_eq!(config.command, "faust");
        assert_eq!(config.kind, ProjectKind::Process);
        assert_eq!(config.process_name, "process");
        assert!(config.process_files.is_empty());
        assert!(config.compiler_diagnostics);
    }

    #[test]
    fn partial_files_keep_defaults_for_missing_keys() {
        let config: ProjectConfig =
            serde_json::from_str(r#"{"command": "faust-2", "compiler_diagnostics": false}"#)
                .unwrap();
        assert_eq!(config.command, "faust-2");
        assert!(!config.compiler_diagnostics);
        assert_eq!(config.process_name, "process");
    }

    #[test]
    fn process_files_restrict_the_process_set() {
        let root = Path::new("/ws");
        let mut config = ProjectConfig::default();

        // Empty list: every .dsp file is a process, libraries are not.
        assert!(config.is_process_file(root, Path::new("/ws/main.dsp")));
        assert!(!config.is_process_file(root, Path::new("/ws/util.lib")));

        config.process_files = vec![PathBuf::from("synth/main.dsp")];
        assert!(config.is_process_file(root, Path::new("/ws/synth/main.dsp")));
        assert!(!config.is_process_file(root, Path::new("/ws/other.dsp")));
    }

    #[test]
    fn load_falls_back_when_file_is_missing_or_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProjectConfig::load(dir.path());
        assert_eq!(config.command, "faust");

        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "{not json").unwrap();
        let config = ProjectConfig::load(dir.path());
        assert_eq!(config.command, "faust");

        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"{"command": "faustine"}"#,
        )
        .unwrap();
        let config = ProjectConfig::load(dir.path());
        assert_eq!(config.command, "faustine");
    }
}
