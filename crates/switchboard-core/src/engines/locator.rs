//! Engine binary resolution.
//!
//! Order: configured override, then PATH, then the usual per-user and
//! package-manager install directories.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use super::EngineKind;
use crate::config::CoreConfig;
use crate::error::{CoreError, Result};
use crate::paths::home_dir;

#[derive(Debug, Clone, Default)]
pub struct EngineLocator {
    overrides: HashMap<EngineKind, PathBuf>,
}

impl EngineLocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides taken from each engine's configured `binaryPath`.
    pub fn from_config(config: &CoreConfig) -> Self {
        EngineKind::ALL.iter().fold(Self::new(), |locator, kind| {
            match config.engine(*kind).binary_path {
                Some(path) => locator.with_override(*kind, path),
                None => locator,
            }
        })
    }

    pub fn with_override(mut self, kind: EngineKind, path: impl Into<PathBuf>) -> Self {
        self.overrides.insert(kind, path.into());
        self
    }

    pub fn locate(&self, kind: EngineKind) -> Result<PathBuf> {
        if let Some(path) = self.overrides.get(&kind) {
            if is_executable(path) {
                return Ok(path.clone());
            }
            return Err(CoreError::EngineNotFound {
                engine: kind,
                detail: format!("configured path {} is not executable", path.display()),
            });
        }

        let mut dirs: Vec<PathBuf> = env::var_os("PATH")
            .map(|paths| env::split_paths(&paths).collect())
            .unwrap_or_default();
        dirs.extend(fallback_dirs(home_dir().as_deref()));

        find_in_dirs(kind.binary_name(), &dirs).ok_or_else(|| CoreError::EngineNotFound {
            engine: kind,
            detail: format!(
                "`{}` is not on PATH or in a known install location",
                kind.binary_name()
            ),
        })
    }
}

/// Install locations that GUI-launched processes usually miss on PATH.
fn fallback_dirs(home: Option<&Path>) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(home) = home {
        dirs.push(home.join(".local").join("bin"));
        dirs.push(home.join(".claude").join("local"));
        dirs.push(home.join(".npm-global").join("bin"));
        dirs.push(home.join(".bun").join("bin"));
    }
    if cfg!(windows) {
        if let Some(appdata) = env::var_os("APPDATA") {
            dirs.push(PathBuf::from(appdata).join("npm"));
        }
    } else {
        dirs.push(PathBuf::from("/opt/homebrew/bin"));
        dirs.push(PathBuf::from("/usr/local/bin"));
        dirs.push(PathBuf::from("/usr/bin"));
    }
    dirs
}

fn find_in_dirs(name: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
    let suffixes: &[&str] = if cfg!(windows) {
        &[".cmd", ".exe", ""]
    } else {
        &[""]
    };
    dirs.iter()
        .flat_map(|dir| suffixes.iter().map(move |s| dir.join(format!("{name}{s}"))))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[cfg(unix)]
    fn make_executable(dir: &Path, name: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    #[cfg(unix)]
    fn override_wins() {
        let dir = TempDir::new().unwrap();
        let path = make_executable(dir.path(), "my-claude");
        let locator = EngineLocator::new().with_override(EngineKind::Claude, &path);
        assert_eq!(locator.locate(EngineKind::Claude).unwrap(), path);
    }

    #[test]
    fn missing_override_is_engine_not_found() {
        let locator =
            EngineLocator::new().with_override(EngineKind::Gemini, "/definitely/not/here/gemini");
        match locator.locate(EngineKind::Gemini) {
            Err(CoreError::EngineNotFound { engine, detail }) => {
                assert_eq!(engine, EngineKind::Gemini);
                assert!(detail.contains("/definitely/not/here/gemini"));
            }
            other => panic!("expected EngineNotFound, got {other:?}"),
        }
    }

    #[test]
    fn config_binary_path_becomes_override() {
        let mut config = CoreConfig::default();
        config.engines.insert(
            EngineKind::Claude,
            crate::config::EngineSettings {
                binary_path: Some(PathBuf::from("/nowhere/claude")),
                ..Default::default()
            },
        );
        let locator = EngineLocator::from_config(&config);
        assert!(matches!(
            locator.locate(EngineKind::Claude),
            Err(CoreError::EngineNotFound { detail, .. }) if detail.contains("/nowhere/claude")
        ));
    }

    #[test]
    #[cfg(unix)]
    fn finds_first_matching_dir() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        let expected = make_executable(second.path(), "claude");
        let dirs = vec![first.path().to_path_buf(), second.path().to_path_buf()];
        assert_eq!(find_in_dirs("claude", &dirs), Some(expected));
    }

    #[test]
    #[cfg(unix)]
    fn skips_non_executable_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("gemini"), "not a program").unwrap();
        assert_eq!(find_in_dirs("gemini", &[dir.path().to_path_buf()]), None);
    }

    #[test]
    fn fallback_dirs_include_home_locations() {
        let dirs = fallback_dirs(Some(Path::new("/home/me")));
        assert!(dirs.contains(&PathBuf::from("/home/me/.local/bin")));
        assert!(dirs.contains(&PathBuf::from("/home/me/.claude/local")));
    }
}
