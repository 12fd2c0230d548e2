use std::path::Path;

use crate::backends::SyncError;

#[cfg(unix)]
mod unix {
    use std::ffi::CString;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::{mem, ptr};

    use crate::backends::SyncError;

    const LOOKUP_BUF_SIZE: usize = 16 * 1024;

    fn c_name(kind: &str, name: &str) -> Result<CString, SyncError> {
        CString::new(name).map_err(|_| SyncError::Permissions(format!("invalid {kind} name {name:?}")))
    }

    /// Resolve a user name (or numeric id) to a uid.
    pub fn lookup_uid(name: &str) -> Result<u32, SyncError> {
        if let Ok(uid) = name.parse::<u32>() {
            return Ok(uid);
        }
        let cname = c_name("user", name)?;
        let mut pwd: libc::passwd = unsafe { mem::zeroed() };
        let mut buf = vec![0 as libc::c_char; LOOKUP_BUF_SIZE];
        let mut result: *mut libc::passwd = ptr::null_mut();
        let rc = unsafe {
            libc::getpwnam_r(cname.as_ptr(), &mut pwd, buf.as_mut_ptr(), buf.len(), &mut result)
        };
        if rc != 0 || result.is_null() {
            return Err(SyncError::Permissions(format!("unknown user {name:?}")));
        }
        Ok(pwd.pw_uid)
    }

    /// Resolve a group name (or numeric id) to a gid.
    pub fn lookup_gid(name: &str) -> Result<u32, SyncError> {
        if let Ok(gid) = name.parse::<u32>() {
            return Ok(gid);
        }
        let cname = c_name("group", name)?;
        let mut grp: libc::group = unsafe { mem::zeroed() };
        let mut buf = vec![0 as libc::c_char; LOOKUP_BUF_SIZE];
        let mut result: *mut libc::group = ptr::null_mut();
        let rc = unsafe {
            libc::getgrnam_r(cname.as_ptr(), &mut grp, buf.as_mut_ptr(), buf.len(), &mut result)
        };
        if rc != 0 || result.is_null() {
            return Err(SyncError::Permissions(format!("unknown group {name:?}")));
        }
        Ok(grp.gr_gid)
    }

    pub fn set_file_permissions(
        path: &Path,
        user: Option<&str>,
        group: Option<&str>,
        mode: u32,
    ) -> Result<(), SyncError> {
        let uid = user.map(lookup_uid).transpose()?;
        let gid = group.map(lookup_gid).transpose()?;
        // chown clears the setuid and setgid bits, so the mode goes on last.
        if uid.is_some() || gid.is_some() {
            std::os::unix::fs::chown(path, uid, gid)
                .map_err(|e| SyncError::Permissions(format!("chown {path:?}: {e}")))?;
        }

        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .map_err(|e| SyncError::Permissions(format!("chmod {mode:o} {path:?}: {e}")))
    }

    pub fn file_mode(metadata: &fs::Metadata) -> u32 {
        metadata.permissions().mode() & 0o7777
    }
}

#[cfg(unix)]
pub use unix::{lookup_gid, lookup_uid};

/// Apply `mode` and, when given, ownership to `path`.
///
/// Ownership is applied first so the setuid and setgid bits of `mode` survive;
/// unknown users or groups are an error.
#[cfg(unix)]
pub fn set_file_permissions(
    path: &Path,
    user: Option<&str>,
    group: Option<&str>,
    mode: u32,
) -> Result<(), SyncError> {
    unix::set_file_permissions(path, user, group, mode)
}

#[cfg(unix)]
pub fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    unix::file_mode(metadata)
}

/// Only the owner write bit maps to anything here; ownership is ignored.
#[cfg(not(unix))]
pub fn set_file_permissions(
    path: &Path,
    user: Option<&str>,
    group: Option<&str>,
    mode: u32,
) -> Result<(), SyncError> {
    if user.is_some() || group.is_some() {
        log::warn!("{path:?}: file ownership is not supported on this platform");
    }
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_readonly(mode & 0o200 == 0);
    std::fs::set_permissions(path, perms)
        .map_err(|e| SyncError::Permissions(format!("{path:?}: {e}")))
}

#[cfg(not(unix))]
pub fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o664
    }
}
