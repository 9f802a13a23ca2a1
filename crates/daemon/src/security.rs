// Owner-only permissions for daemon state under `~/.redraft/`.
//
// The socket is the only access control the daemon has, so its directory,
// pid file, and config are kept private to the current user.

use std::fs::{self, OpenOptions};
use std::path::Path;

use anyhow::{Context, Result};

const OWNER_ONLY_FILE_MODE: u32 = 0o600;
const OWNER_ONLY_DIR_MODE: u32 = 0o700;

pub fn ensure_owner_only_file(path: &Path) -> Result<()> {
    ensure_mode(path, OWNER_ONLY_FILE_MODE)
}

pub fn ensure_owner_only_dir(path: &Path) -> Result<()> {
    ensure_mode(path, OWNER_ONLY_DIR_MODE)
}

/// Create the directory (and parents) if needed, then restrict it to the owner.
pub fn create_private_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .with_context(|| format!("failed to create directory `{}`", path.display()))?;
    ensure_owner_only_dir(path)
}

/// Open for writing, truncating, with mode 0600 on creation.
pub fn open_private_truncate(path: &Path) -> std::io::Result<fs::File> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;

        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .mode(OWNER_ONLY_FILE_MODE)
            .open(path)
    }
    #[cfg(not(unix))]
    {
        OpenOptions::new().create(true).write(true).truncate(true).open(path)
    }
}

fn ensure_mode(path: &Path, wanted: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        if !path.exists() {
            return Ok(());
        }

        let metadata = fs::metadata(path)
            .with_context(|| format!("failed to read metadata for `{}`", path.display()))?;
        let mode = metadata.permissions().mode() & 0o777;
        if mode != wanted {
            fs::set_permissions(path, fs::Permissions::from_mode(wanted))
                .with_context(|| format!("failed to set owner-only mode on `{}`", path.display()))?;
        }
    }

    #[cfg(not(unix))]
    {
        let _ = (path, wanted);
    }

    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    use tempfile::tempdir;

    use super::*;

    fn mode_of(path: &Path) -> u32 {
        fs::metadata(path).expect("metadata should be readable").permissions().mode() & 0o777
    }

    #[test]
    fn file_mode_is_tightened_to_owner_only() {
        let tmp = tempdir().expect("tempdir should be created");
        let path = tmp.path().join("config.toml");
        fs::write(&path, "x = 1").expect("file should be written");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).expect("chmod");

        ensure_owner_only_file(&path).expect("mode should be fixed");
        assert_eq!(mode_of(&path), 0o600);
    }

    #[test]
    fn private_dir_is_created_with_owner_only_mode() {
        let tmp = tempdir().expect("tempdir should be created");
        let dir = tmp.path().join("nested").join(".redraft");

        create_private_dir(&dir).expect("dir should be created");
        assert!(dir.is_dir());
        assert_eq!(mode_of(&dir), 0o700);
    }

    #[test]
    fn missing_paths_are_ignored() {
        let tmp = tempdir().expect("tempdir should be created");
        ensure_owner_only_file(&tmp.path().join("missing")).expect("missing file is fine");
        ensure_owner_only_dir(&tmp.path().join("missing-dir")).expect("missing dir is fine");
    }

    #[test]
    fn open_private_truncate_creates_owner_only_file() {
        let tmp = tempdir().expect("tempdir should be created");
        let path = tmp.path().join("redraftd.pid");

        let mut file = open_private_truncate(&path).expect("file should open");
        write!(file, "123").expect("write should succeed");
        drop(file);

        let mut file = open_private_truncate(&path).expect("file should reopen");
        write!(file, "7").expect("write should succeed");
        drop(file);

        assert_eq!(fs::read_to_string(&path).expect("read"), "7");
        assert_eq!(mode_of(&path), 0o600);
    }
}
