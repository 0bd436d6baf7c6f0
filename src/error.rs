//! Typed failures of the library install core.
//!
//! Plumbing below the core (runtime, transport, archives) reports
//! `anyhow::Error`; the core wraps those into [`LibraryError`] together
//! with the identity of the library being processed, so a caller can tell
//! whether anything on disk changed before retrying.

use std::path::PathBuf;

use crate::catalog::{ReleaseId, Version, VersionConstraint};

#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error(
        "two different versions of the library {library} are required: {required} and {conflicting}"
    )]
    DependencyConflict {
        library: String,
        required: Version,
        conflicting: Version,
    },

    #[error("library {library} not found (version {constraint})")]
    NotFound {
        library: String,
        constraint: VersionConstraint,
    },

    #[error("library {release} is already installed, but with a different version: {installed}")]
    OverwriteConflict {
        release: ReleaseId,
        installed: ReleaseId,
    },

    #[error("cannot install {release}: destination directory {} already exists", path.display())]
    DestinationOccupied { release: ReleaseId, path: PathBuf },

    #[error("library {library} is already installed in {}", path.display())]
    AlreadyInstalled { library: String, path: PathBuf },

    #[error("could not download {release}: {source:#}")]
    Download {
        release: ReleaseId,
        source: anyhow::Error,
    },

    #[error("could not remove old library {library}: {source:#}")]
    Uninstall {
        library: ReleaseId,
        source: anyhow::Error,
    },

    #[error("could not install {library}: {source:#}")]
    Install {
        library: String,
        source: anyhow::Error,
    },

    #[error("library catalog unavailable: {0:#}")]
    Catalog(anyhow::Error),

    #[error("could not read installed libraries: {0:#}")]
    Registry(anyhow::Error),

    #[error("libraries were installed but the installed set could not be reloaded: {0:#}")]
    Commit(anyhow::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl LibraryError {
    /// `true` when the failure happened before anything on disk was touched,
    /// so the same request can be reissued as is.
    ///
    /// Execution failures return `false`: entries committed earlier in the
    /// same batch stay installed.
    pub fn is_state_unchanged(&self) -> bool {
        match self {
            Self::DependencyConflict { .. }
            | Self::NotFound { .. }
            | Self::OverwriteConflict { .. }
            | Self::DestinationOccupied { .. }
            | Self::AlreadyInstalled { .. }
            | Self::Catalog(_)
            | Self::Registry(_)
            | Self::InvalidRequest(_) => true,
            Self::Download { .. } | Self::Uninstall { .. } | Self::Install { .. } | Self::Commit(_) => {
                false
            }
        }
    }
}
