//! Polling scheduler for ironsync.
//!
//! Current behavior:
//! - One worker thread per connection; connections never share state.
//! - Each tick, a worker walks its resources in order and refreshes the due ones.
//! - A refresh is: pre-update hook, fetch into staging, compare, install, post-update hook.
//! - Success (including "nothing changed") reschedules after `interval`,
//!   any failure after `retry_interval`. Workers never exit on errors.
//!
//! Note:
//! - Update latency is bounded by the tick period, not by a per-resource timer.
//! - A slow fetch delays the other resources of the same connection only.

use std::io;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{select, Receiver, Sender};
use log::{error, info, warn};

use crate::backends::SyncError;
use crate::compare;
use crate::connection::{Connection, Download};
use crate::install;
use crate::system::{OsSystem, System};

/// Default period between two scans of a connection's resources.
pub const DEFAULT_TICK: Duration = Duration::from_millis(1000);

/// What happened to one due resource during a tick.
#[derive(Debug)]
pub enum UpdateStatus {
    /// New content was installed.
    Updated,
    /// The server reported no change.
    NotModified,
    /// New content was fetched but matched the installed file.
    Unchanged,
    Failed(SyncError),
}

enum Processed {
    NotModified,
    Unchanged(Option<DateTime<Utc>>),
    Updated(Option<DateTime<Utc>>),
}

/// Drives the resources of a single connection.
pub struct Worker<S: System = OsSystem> {
    connection: Connection,
    system: S,
}

impl Worker<OsSystem> {
    pub fn new(connection: Connection) -> Self {
        Self::with_system(connection, OsSystem)
    }
}

impl<S: System> Worker<S> {
    pub fn with_system(connection: Connection, system: S) -> Self {
        Self { connection, system }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.connection
    }

    pub fn system(&self) -> &S {
        &self.system
    }

    pub fn into_connection(self) -> Connection {
        self.connection
    }

    /// Scan all resources once and refresh the due ones.
    ///
    /// Returns the install path and outcome of every resource that was due.
    pub fn run_tick(&mut self) -> Vec<(PathBuf, UpdateStatus)> {
        let mut report = Vec::new();

        for index in 0..self.connection.resources.len() {
            if !self.connection.resources[index].is_due(Utc::now()) {
                continue;
            }
            info!(
                "[{}][{}] Updating resource",
                self.connection.name,
                self.connection.resources[index].path.display()
            );

            let result = self.process(index);
            let now = Utc::now();
            let name = &self.connection.name;
            let resource = &mut self.connection.resources[index];
            let status = match result {
                Ok(Processed::Updated(last_modified)) => {
                    info!("[{}][{}] Resource successfully updated", name, resource.path.display());
                    if let Some(time) = last_modified {
                        resource.record_last_modified(time);
                    }
                    resource.last_update_time = Some(now);
                    resource.schedule_success(now);
                    UpdateStatus::Updated
                }
                Ok(Processed::Unchanged(last_modified)) => {
                    info!("[{}][{}] Resource content unchanged", name, resource.path.display());
                    if let Some(time) = last_modified {
                        resource.record_last_modified(time);
                    }
                    resource.schedule_success(now);
                    UpdateStatus::Unchanged
                }
                Ok(Processed::NotModified) => {
                    info!("[{}][{}] Resource not modified", name, resource.path.display());
                    resource.schedule_success(now);
                    UpdateStatus::NotModified
                }
                Err(e) => {
                    error!("[{}][{}] Resource failed to update: {e}", name, resource.path.display());
                    resource.schedule_retry(now);
                    UpdateStatus::Failed(e)
                }
            };
            report.push((resource.path.clone(), status));
        }

        report
    }

    fn process(&mut self, index: usize) -> Result<Processed, SyncError> {
        if let Some(hook) = &self.connection.resources[index].pre_update {
            self.system.run_command(hook, "Pre-update")?;
        }

        let (staging, last_modified) = match self.connection.download(index)? {
            Download::NotModified => return Ok(Processed::NotModified),
            Download::Modified {
                staging,
                last_modified,
            } => (staging, last_modified),
        };

        let resource = &self.connection.resources[index];
        // Avoid rewriting the target when the content is the same
        if compare::files_equal(staging.path(), &resource.path) {
            return Ok(Processed::Unchanged(last_modified));
        }

        install::install(&self.system, resource, staging, last_modified)?;

        if let Some(hook) = &resource.post_update {
            if let Err(e) = self.system.run_command(hook, "Post-update") {
                warn!("[{}][{}] {e}", self.connection.name, resource.path.display());
            }
        }
        Ok(Processed::Updated(last_modified))
    }

    /// Tick until `shutdown` fires or its sender is dropped.
    pub fn run(mut self, tick: Duration, shutdown: Receiver<()>) -> Connection {
        info!("[{}] Connection started", self.connection.name);
        let ticker = crossbeam_channel::tick(tick);
        loop {
            self.run_tick();
            select! {
                recv(ticker) -> _ => {}
                recv(shutdown) -> _ => break,
            }
        }
        self.connection.release_handle();
        info!("[{}] Connection stopped", self.connection.name);
        self.connection
    }
}

/// The set of running workers.
pub struct Scheduler {
    workers: Vec<(String, JoinHandle<Connection>)>,
    shutdown: Sender<()>,
}

impl Scheduler {
    /// Spawn one worker per connection that has resources.
    pub fn start(connections: Vec<Connection>, tick: Duration) -> io::Result<Self> {
        let (shutdown, signal) = crossbeam_channel::bounded::<()>(0);
        let mut workers = Vec::new();

        for connection in connections {
            if connection.resources.is_empty() {
                warn!("[{}] No resources, not starting", connection.name);
                continue;
            }
            let name = connection.name.clone();
            let signal = signal.clone();
            let handle = thread::Builder::new()
                .name(format!("ironsync-{name}"))
                .spawn(move || Worker::new(connection).run(tick, signal))?;
            workers.push((name, handle));
        }

        Ok(Self { workers, shutdown })
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Stop every worker after its current tick and hand back the connections.
    pub fn shutdown(self) -> Vec<Connection> {
        drop(self.shutdown);
        Self::join(self.workers)
    }

    /// Block until all workers exit, which only happens if they panic.
    pub fn wait(self) {
        let Scheduler { workers, shutdown } = self;
        Self::join(workers);
        drop(shutdown);
    }

    fn join(workers: Vec<(String, JoinHandle<Connection>)>) -> Vec<Connection> {
        let mut connections = Vec::new();
        for (name, handle) in workers {
            match handle.join() {
                Ok(connection) => connections.push(connection),
                Err(_) => error!("[{name}] Worker thread panicked"),
            }
        }
        connections
    }
}
