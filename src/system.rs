use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::backends::SyncError;
use crate::resource::Hook;
use crate::{hooks, permissions, utils};

/// Mode and modification time of an installed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub mode: u32,
    pub modified: Option<DateTime<Utc>>,
}

/// OS services the worker relies on but does not implement itself.
pub trait System: Send {
    fn apply_permissions(
        &self,
        path: &Path,
        user: Option<&str>,
        group: Option<&str>,
        mode: u32,
    ) -> Result<(), SyncError>;

    fn run_command(&self, hook: &Hook, stage: &'static str) -> Result<(), SyncError>;

    /// `None` when nothing is installed at `path`.
    fn stat_existing(&self, path: &Path) -> Option<FileStat>;
}

/// The real operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsSystem;

impl System for OsSystem {
    fn apply_permissions(
        &self,
        path: &Path,
        user: Option<&str>,
        group: Option<&str>,
        mode: u32,
    ) -> Result<(), SyncError> {
        permissions::set_file_permissions(path, user, group, mode)
    }

    fn run_command(&self, hook: &Hook, stage: &'static str) -> Result<(), SyncError> {
        hooks::run_command(hook, stage)
    }

    fn stat_existing(&self, path: &Path) -> Option<FileStat> {
        let metadata = fs::metadata(path).ok()?;
        Some(FileStat {
            mode: permissions::file_mode(&metadata),
            modified: metadata.modified().ok().map(utils::to_utc),
        })
    }
}
