// Agent executable lookup.
//
// A daemon started from a GUI launcher or launchd inherits a minimal PATH, so
// the search list is the inherited PATH plus the usual per-user and package
// manager install directories.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub trait CommandResolver: Send + Sync {
    /// Absolute path of an executable for `command`, if one exists.
    fn resolve(&self, command: &str) -> Option<PathBuf>;
}

/// Resolves commands against an ordered list of directories.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPathResolver {
    dirs: Vec<PathBuf>,
}

impl SearchPathResolver {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    /// Inherited `PATH` followed by well-known install directories.
    pub fn from_env() -> Self {
        Self::from_parts(std::env::var_os("PATH"), dirs::home_dir())
    }

    fn from_parts(path_var: Option<OsString>, home: Option<PathBuf>) -> Self {
        let mut dirs: Vec<PathBuf> =
            path_var.map(|value| std::env::split_paths(&value).collect()).unwrap_or_default();

        if let Some(home) = home {
            dirs.extend(
                [".local/bin", ".cargo/bin", ".bun/bin", ".npm-global/bin", ".volta/bin"]
                    .into_iter()
                    .map(|suffix| home.join(suffix)),
            );
        }
        dirs.extend(
            ["/opt/homebrew/bin", "/usr/local/bin", "/usr/bin", "/bin"].into_iter().map(PathBuf::from),
        );

        let mut unique = Vec::with_capacity(dirs.len());
        for dir in dirs {
            if !dir.as_os_str().is_empty() && !unique.contains(&dir) {
                unique.push(dir);
            }
        }
        Self { dirs: unique }
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }
}

impl CommandResolver for SearchPathResolver {
    fn resolve(&self, command: &str) -> Option<PathBuf> {
        let command = command.trim();
        if command.is_empty() {
            return None;
        }
        if command.contains('/') {
            let path = PathBuf::from(command);
            return is_executable(&path).then_some(path);
        }
        self.dirs.iter().map(|dir| dir.join(command)).find(|candidate| is_executable(candidate))
    }
}

fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}
