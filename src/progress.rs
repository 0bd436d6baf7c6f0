//! Progress reporting for install operations.
//!
//! The install core emits [`ProgressEvent`]s into a [`ProgressSink`]. Remote
//! callers consume them through [`ChannelSink`], which splits the events
//! into two independently drained streams: download progress and task
//! progress. Delivery never blocks the installer; events for a consumer
//! that has gone away are dropped.

use log::debug;
use std::fmt;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::catalog::ReleaseId;

/// Why a library ended up installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallReason {
    pub kind: ReasonKind,
    /// Root install into the IDE built-in location
    pub builtin: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasonKind {
    Install,
    Upgrade,
    Depends,
}

impl InstallReason {
    pub fn new(kind: ReasonKind, builtin: bool) -> Self {
        Self { kind, builtin }
    }
}

impl fmt::Display for InstallReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ReasonKind::Install => "install",
            ReasonKind::Upgrade => "upgrade",
            ReasonKind::Depends => "depends",
        };
        if self.builtin && self.kind != ReasonKind::Depends {
            write!(f, "{}-builtin", kind)
        } else {
            f.write_str(kind)
        }
    }
}

/// Lifecycle event of a single library within an install request.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    DownloadStarted {
        release: ReleaseId,
        url: String,
        total: u64,
    },
    Downloading {
        release: ReleaseId,
        downloaded: u64,
        total: u64,
    },
    DownloadFinished {
        release: ReleaseId,
        cached: bool,
    },
    InstallStarted {
        release: ReleaseId,
    },
    Replacing {
        release: ReleaseId,
        replaced: ReleaseId,
    },
    Installed {
        release: ReleaseId,
        reason: InstallReason,
    },
    Skipped {
        release: ReleaseId,
    },
}

/// Bytes transferred for one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadProgress {
    pub file: String,
    pub url: Option<String>,
    pub downloaded: u64,
    pub total: u64,
    pub completed: bool,
}

/// Human readable step of an install task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskProgress {
    pub name: Option<String>,
    pub message: String,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressUpdate {
    Download(DownloadProgress),
    Task(TaskProgress),
}

impl ProgressEvent {
    pub fn release(&self) -> &ReleaseId {
        match self {
            Self::DownloadStarted { release, .. }
            | Self::Downloading { release, .. }
            | Self::DownloadFinished { release, .. }
            | Self::InstallStarted { release }
            | Self::Replacing { release, .. }
            | Self::Installed { release, .. }
            | Self::Skipped { release } => release,
        }
    }

    pub fn to_update(&self) -> ProgressUpdate {
        match self {
            Self::DownloadStarted {
                release,
                url,
                total,
            } => ProgressUpdate::Download(DownloadProgress {
                file: release.to_string(),
                url: Some(url.clone()),
                downloaded: 0,
                total: *total,
                completed: false,
            }),
            Self::Downloading {
                release,
                downloaded,
                total,
            } => ProgressUpdate::Download(DownloadProgress {
                file: release.to_string(),
                url: None,
                downloaded: *downloaded,
                total: *total,
                completed: false,
            }),
            Self::DownloadFinished { release, cached } => {
                let file = if *cached {
                    format!("{} (cached)", release)
                } else {
                    release.to_string()
                };
                ProgressUpdate::Download(DownloadProgress {
                    file,
                    url: None,
                    downloaded: 0,
                    total: 0,
                    completed: true,
                })
            }
            Self::InstallStarted { release } => ProgressUpdate::Task(TaskProgress {
                name: Some(format!("Installing {}", release)),
                message: String::new(),
                completed: false,
            }),
            Self::Replacing { release, replaced } => ProgressUpdate::Task(TaskProgress {
                name: None,
                message: format!("Replacing {} with {}", replaced, release),
                completed: false,
            }),
            Self::Installed { release, reason } => ProgressUpdate::Task(TaskProgress {
                name: None,
                message: format!("Installed {} ({})", release, reason),
                completed: true,
            }),
            Self::Skipped { release } => ProgressUpdate::Task(TaskProgress {
                name: None,
                message: format!("Library {} is already installed", release),
                completed: true,
            }),
        }
    }
}

/// Receiver of install lifecycle events.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Sink that drops every event.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Forwards events into a download channel and a task channel.
#[derive(Clone)]
pub struct ChannelSink {
    downloads: UnboundedSender<DownloadProgress>,
    tasks: UnboundedSender<TaskProgress>,
}

/// Caller side of a [`ChannelSink`]. Both receivers must be drained.
pub struct ProgressReceivers {
    pub downloads: UnboundedReceiver<DownloadProgress>,
    pub tasks: UnboundedReceiver<TaskProgress>,
}

impl ChannelSink {
    pub fn new() -> (Self, ProgressReceivers) {
        let (downloads_tx, downloads_rx) = unbounded_channel();
        let (tasks_tx, tasks_rx) = unbounded_channel();
        (
            Self {
                downloads: downloads_tx,
                tasks: tasks_tx,
            },
            ProgressReceivers {
                downloads: downloads_rx,
                tasks: tasks_rx,
            },
        )
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, event: ProgressEvent) {
        let delivered = match event.to_update() {
            ProgressUpdate::Download(p) => self.downloads.send(p).is_ok(),
            ProgressUpdate::Task(t) => self.tasks.send(t).is_ok(),
        };
        if !delivered {
            debug!("Progress consumer gone, dropping event for {}", event.release());
        }
    }
}

/// Prints task progress to stdout for the command line.
pub struct ConsoleSink {
    pub verbose: bool,
}

impl ProgressSink for ConsoleSink {
    fn emit(&self, event: ProgressEvent) {
        match event.to_update() {
            ProgressUpdate::Task(task) => {
                if let Some(name) = task.name {
                    println!("{}", name);
                }
                if !task.message.is_empty() {
                    println!("{}", task.message);
                }
            }
            ProgressUpdate::Download(p) if p.url.is_some() => {
                println!("Downloading {}...", p.file);
            }
            ProgressUpdate::Download(p) if p.completed && self.verbose => {
                println!("Downloaded {}", p.file);
            }
            ProgressUpdate::Download(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Version;

    fn id(name: &str, version: &str) -> ReleaseId {
        ReleaseId::new(name, Version::parse(version).unwrap())
    }

    #[test]
    fn test_reason_names() {
        assert_eq!(InstallReason::new(ReasonKind::Install, false).to_string(), "install");
        assert_eq!(
            InstallReason::new(ReasonKind::Upgrade, true).to_string(),
            "upgrade-builtin"
        );
        assert_eq!(InstallReason::new(ReasonKind::Depends, true).to_string(), "depends");
    }

    #[test]
    fn test_skip_maps_to_completed_task() {
        let update = ProgressEvent::Skipped {
            release: id("Servo", "1.2.0"),
        }
        .to_update();
        match update {
            ProgressUpdate::Task(task) => {
                assert!(task.completed);
                assert!(task.message.contains("Servo@1.2.0"));
            }
            other => panic!("unexpected update {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_channel_sink_splits_streams_in_order() {
        let (sink, mut receivers) = ChannelSink::new();
        let servo = id("Servo", "1.2.0");

        sink.emit(ProgressEvent::DownloadStarted {
            release: servo.clone(),
            url: "https://example.com/Servo-1.2.0.zip".into(),
            total: 10,
        });
        sink.emit(ProgressEvent::Downloading {
            release: servo.clone(),
            downloaded: 10,
            total: 10,
        });
        sink.emit(ProgressEvent::InstallStarted {
            release: servo.clone(),
        });
        sink.emit(ProgressEvent::Installed {
            release: servo.clone(),
            reason: InstallReason::new(ReasonKind::Install, false),
        });
        drop(sink);

        let first = receivers.downloads.recv().await.unwrap();
        assert_eq!(first.total, 10);
        assert!(first.url.is_some());
        assert_eq!(receivers.downloads.recv().await.unwrap().downloaded, 10);
        assert!(receivers.downloads.recv().await.is_none());

        assert!(!receivers.tasks.recv().await.unwrap().completed);
        let done = receivers.tasks.recv().await.unwrap();
        assert!(done.completed);
        assert!(done.message.contains("(install)"));
    }

    #[test]
    fn test_channel_sink_tolerates_dropped_receivers() {
        let (sink, receivers) = ChannelSink::new();
        drop(receivers);
        sink.emit(ProgressEvent::Skipped {
            release: id("Wire", "1.0.0"),
        });
    }
}
