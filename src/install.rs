use chrono::{DateTime, Utc};
use filetime::FileTime;
use tempfile::NamedTempFile;

use crate::backends::SyncError;
use crate::resource::Resource;
use crate::system::System;

/// Mode for freshly installed files with nothing to inherit from.
pub const DEFAULT_MODE: u32 = 0o664;

/// The declared mode, else the installed file's, else [`DEFAULT_MODE`].
pub fn effective_mode<S: System + ?Sized>(system: &S, resource: &Resource) -> u32 {
    if resource.perms != 0 {
        return resource.perms;
    }
    system
        .stat_existing(&resource.path)
        .map(|stat| stat.mode)
        .unwrap_or(DEFAULT_MODE)
}

/// Move a staged download onto the resource path.
///
/// Ownership and mode are applied to the staging file first, then it is
/// renamed over the target in one step. The staging file is deleted on every
/// failure path.
pub fn install<S: System + ?Sized>(
    system: &S,
    resource: &Resource,
    staging: NamedTempFile,
    last_modified: Option<DateTime<Utc>>,
) -> Result<(), SyncError> {
    let mode = effective_mode(system, resource);
    system.apply_permissions(
        staging.path(),
        resource.user.as_deref(),
        resource.group.as_deref(),
        mode,
    )?;

    if let Some(time) = last_modified {
        filetime::set_file_mtime(staging.path(), FileTime::from_unix_time(time.timestamp(), 0))?;
    }

    staging
        .persist(&resource.path)
        .map_err(|e| SyncError::Install {
            path: resource.path.clone(),
            source: e.error,
        })?;
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::system::OsSystem;
    use chrono::TimeZone;
    use std::fs;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    fn staged(dir: &std::path::Path, content: &[u8]) -> NamedTempFile {
        let mut f = NamedTempFile::new_in(dir).unwrap();
        f.write_all(content).unwrap();
        f
    }

    #[test]
    fn test_effective_mode_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target");
        let mut resource = Resource::new(&path);

        assert_eq!(effective_mode(&OsSystem, &resource), DEFAULT_MODE);

        fs::write(&path, b"old").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();
        assert_eq!(effective_mode(&OsSystem, &resource), 0o600);

        resource.perms = 0o644;
        assert_eq!(effective_mode(&OsSystem, &resource), 0o644);
    }

    #[test]
    fn test_install_replaces_and_inherits_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target");
        fs::write(&path, b"old").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o640)).unwrap();

        let staging = staged(dir.path(), b"new");
        let staging_path = staging.path().to_path_buf();
        let lm = Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap();
        install(&OsSystem, &Resource::new(&path), staging, Some(lm)).unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"new");
        let meta = fs::metadata(&path).unwrap();
        assert_eq!(meta.permissions().mode() & 0o7777, 0o640);
        assert_eq!(
            FileTime::from_last_modification_time(&meta).unix_seconds(),
            lm.timestamp()
        );
        assert!(!staging_path.exists());
    }

    #[test]
    fn test_install_failure_discards_staging() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target");
        fs::write(&path, b"old").unwrap();

        let staging = staged(dir.path(), b"new");
        let staging_path = staging.path().to_path_buf();
        let mut resource = Resource::new(&path);
        resource.user = Some("no-such-user-ironsync".into());

        assert!(install(&OsSystem, &resource, staging, None).is_err());
        assert_eq!(fs::read(&path).unwrap(), b"old");
        assert!(!staging_path.exists());
    }
}
