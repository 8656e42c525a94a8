//! Executable deployment
//!
//! Ensures the daemon binary exists at a writable, platform-appropriate
//! location. The destination tree is replaced as a whole whenever the
//! executable's SHA-1 differs from the source, so auxiliary files never
//! mix between versions.

use sha1::{Digest, Sha1};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use super::DaemonError;

/// Copies the daemon tree from `src_dir` to `dest_dir` when needed
#[derive(Debug, Clone)]
pub struct ExecutableDeployer {
    name: String,
    src_dir: PathBuf,
    dest_dir: PathBuf,
}

impl ExecutableDeployer {
    /// Create a deployer; fails if the source executable does not exist
    pub fn new(
        name: impl Into<String>,
        src_dir: impl Into<PathBuf>,
        dest_dir: impl Into<PathBuf>,
    ) -> Result<Self, DaemonError> {
        let deployer = Self {
            name: name.into(),
            src_dir: src_dir.into(),
            dest_dir: dest_dir.into(),
        };
        let source = deployer.source();
        if !source.is_file() {
            return Err(DaemonError::NotFound(source));
        }
        Ok(deployer)
    }

    /// Source executable path
    pub fn source(&self) -> PathBuf {
        self.src_dir.join(&self.name)
    }

    /// Deployed executable path
    pub fn destination(&self) -> PathBuf {
        self.dest_dir.join(&self.name)
    }

    /// Directory the daemon runs from
    pub fn dest_dir(&self) -> &Path {
        &self.dest_dir
    }

    /// Make sure the destination holds a copy identical to the source
    ///
    /// Returns `true` when a copy was made.
    pub fn deploy(&self) -> Result<bool, DaemonError> {
        if self.dest_dir == self.src_dir {
            return Ok(false);
        }

        let source = self.source();
        if !source.is_file() {
            return Err(DaemonError::NotFound(source));
        }

        let dest = self.destination();
        if dest.is_file() && sha1_file(&source)? == sha1_file(&dest)? {
            debug!("Daemon at '{}' is up to date", dest.display());
            return Ok(false);
        }

        info!("Updating daemon '{}'", dest.display());
        let staging = staging_dir(&self.dest_dir);
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        copy_tree(&self.src_dir, &staging)?;

        if self.dest_dir.exists() {
            debug!("Removing old daemon dir {}", self.dest_dir.display());
            fs::remove_dir_all(&self.dest_dir)?;
        }
        fs::rename(&staging, &self.dest_dir)?;
        Ok(true)
    }
}

/// Sibling directory used to build the new tree before swapping it in
fn staging_dir(dest_dir: &Path) -> PathBuf {
    let mut name = dest_dir
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    dest_dir.with_file_name(name)
}

/// Hex SHA-1 of a file's contents
pub fn sha1_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha1::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Recursively copy `src` into `dst`, preserving file permissions
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(io::Error::other)?;
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

// =============================================================================
// Destination Resolution
// =============================================================================

/// First existing directory among `primary` and `fallbacks`
///
/// Falls back to `primary` when none exists.
pub fn resolve_app_dir(primary: &Path, fallbacks: &[PathBuf]) -> PathBuf {
    if primary.exists() {
        return primary.to_path_buf();
    }
    debug!("Default app dir '{}' does not exist", primary.display());
    fallbacks
        .iter()
        .find(|dir| dir.exists())
        .cloned()
        .unwrap_or_else(|| primary.to_path_buf())
}

/// Application-private daemon dir on Android (`/data/data/<app id>/files/torrserver`)
pub fn android_dest_dir(fallbacks: &[PathBuf]) -> Option<PathBuf> {
    let cmdline = fs::read_to_string("/proc/self/cmdline").ok()?;
    let app_id = cmdline.split('\0').next()?.trim();
    if app_id.is_empty() {
        return None;
    }
    let primary = Path::new("/data/data").join(app_id);
    let app_dir = resolve_app_dir(&primary, fallbacks);
    debug!("Using android app dir '{}'", app_dir.display());
    Some(app_dir.join("files").join("torrserver"))
}

/// Where the daemon should be deployed on this platform
pub fn platform_dest_dir(src_dir: &Path, configured: Option<&Path>) -> PathBuf {
    if cfg!(target_os = "android") {
        if let Some(dir) = android_dest_dir(&[]) {
            return dir;
        }
    }
    configured
        .map(Path::to_path_buf)
        .unwrap_or_else(|| src_dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAME: &str = "TorrServer";

    fn source_tree(root: &Path, contents: &[u8]) -> PathBuf {
        let src = root.join("src");
        fs::create_dir_all(src.join("lib")).unwrap();
        fs::write(src.join(NAME), contents).unwrap();
        fs::write(src.join("lib").join("helper.so"), b"helper").unwrap();
        src
    }

    #[test]
    fn test_missing_source_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = ExecutableDeployer::new(NAME, dir.path(), dir.path().join("dest")).unwrap_err();
        assert!(matches!(err, DaemonError::NotFound(_)));
    }

    #[test]
    fn test_copies_whole_tree_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let src = source_tree(dir.path(), b"v1");
        let dest = dir.path().join("dest");

        let deployer = ExecutableDeployer::new(NAME, &src, &dest).unwrap();
        assert!(deployer.deploy().unwrap());
        assert_eq!(fs::read(dest.join(NAME)).unwrap(), b"v1");
        assert!(dest.join("lib").join("helper.so").exists());
        assert!(!staging_dir(&dest).exists());
    }

    #[test]
    fn test_no_copy_when_digests_match() {
        let dir = tempfile::tempdir().unwrap();
        let src = source_tree(dir.path(), b"v1");
        let dest = dir.path().join("dest");
        let deployer = ExecutableDeployer::new(NAME, &src, &dest).unwrap();
        deployer.deploy().unwrap();

        // A file only present in the destination survives a no-op deploy
        fs::write(dest.join("settings.json"), b"{}").unwrap();
        assert!(!deployer.deploy().unwrap());
        assert!(dest.join("settings.json").exists());
    }

    #[test]
    fn test_full_replace_when_digest_differs() {
        let dir = tempfile::tempdir().unwrap();
        let src = source_tree(dir.path(), b"v1");
        let dest = dir.path().join("dest");
        let deployer = ExecutableDeployer::new(NAME, &src, &dest).unwrap();
        deployer.deploy().unwrap();
        fs::write(dest.join("stale.txt"), b"old").unwrap();

        fs::write(src.join(NAME), b"v2").unwrap();
        assert!(deployer.deploy().unwrap());
        assert_eq!(fs::read(dest.join(NAME)).unwrap(), b"v2");
        assert!(!dest.join("stale.txt").exists());
        assert_eq!(
            sha1_file(&src.join(NAME)).unwrap(),
            sha1_file(&dest.join(NAME)).unwrap()
        );
    }

    #[test]
    fn test_same_dir_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let src = source_tree(dir.path(), b"v1");
        let deployer = ExecutableDeployer::new(NAME, &src, &src).unwrap();
        assert!(!deployer.deploy().unwrap());
    }

    #[test]
    fn test_sha1_known_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha1_file(&path).unwrap(),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_resolve_app_dir_fallbacks() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let also_missing = dir.path().join("also-missing");
        let existing = dir.path().join("existing");
        fs::create_dir_all(&existing).unwrap();

        assert_eq!(
            resolve_app_dir(&missing, &[also_missing.clone(), existing.clone()]),
            existing
        );
        assert_eq!(resolve_app_dir(&missing, &[also_missing]), missing);
        assert_eq!(resolve_app_dir(&existing, &[]), existing);
    }

    #[test]
    fn test_platform_dest_dir_prefers_configured() {
        let src = Path::new("/addon/bin");
        if !cfg!(target_os = "android") {
            assert_eq!(platform_dest_dir(src, None), PathBuf::from("/addon/bin"));
            assert_eq!(
                platform_dest_dir(src, Some(Path::new("/data/bin"))),
                PathBuf::from("/data/bin")
            );
        }
    }
}
