// Session token storage.
//
// The token is owned by an explicit `AuthContext` that is built once at
// startup and handed to everything that needs it; nothing reads it from
// ambient state.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use directories::ProjectDirs;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("could not determine a data directory for the token file")]
    NoDataDir,

    #[error("failed to access token file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("auth token must not be empty")]
    EmptyToken,
}

/// Source of the API session token.
pub trait AuthContext: Send + Sync {
    /// The current token, if signed in.
    fn token(&self) -> Option<String>;

    /// Replace the stored token.
    fn set_token(&self, token: String) -> Result<(), AuthError>;

    /// Forget the stored token.
    fn clear_token(&self) -> Result<(), AuthError>;
}

// ---------------------------------------------------------------------------
// In-memory context
// ---------------------------------------------------------------------------

/// Token held only for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryAuth {
    token: RwLock<Option<String>>,
}

impl MemoryAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }
}

impl AuthContext for MemoryAuth {
    fn token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_token(&self, token: String) -> Result<(), AuthError> {
        let token = normalize(token)?;
        *self
            .token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(token);
        Ok(())
    }

    fn clear_token(&self) -> Result<(), AuthError> {
        *self
            .token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// File-backed context
// ---------------------------------------------------------------------------

/// Token persisted to a file so it survives restarts. The file is read once
/// on open; afterwards the in-memory copy is authoritative and every change
/// is written through.
#[derive(Debug)]
pub struct FileAuth {
    path: PathBuf,
    cached: MemoryAuth,
}

impl FileAuth {
    /// Open the token file at `path`, loading any token already stored there.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AuthError> {
        let path = path.into();
        let cached = MemoryAuth::new();
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                let token = contents.trim();
                if !token.is_empty() {
                    debug!("Loaded auth token from {}", path.display());
                    cached.set_token(token.to_string())?;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(AuthError::Io { path, source }),
        }
        Ok(Self { path, cached })
    }

    /// Open the token file in the platform data directory.
    pub fn open_default() -> Result<Self, AuthError> {
        Self::open(default_token_path()?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuthContext for FileAuth {
    fn token(&self) -> Option<String> {
        self.cached.token()
    }

    fn set_token(&self, token: String) -> Result<(), AuthError> {
        let token = normalize(token)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| AuthError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(&self.path, &token).map_err(|source| AuthError::Io {
            path: self.path.clone(),
            source,
        })?;
        self.cached.set_token(token)?;
        info!("Stored auth token at {}", self.path.display());
        Ok(())
    }

    fn clear_token(&self) -> Result<(), AuthError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => info!("Removed auth token at {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(AuthError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        }
        self.cached.clear_token()
    }
}

/// `<data dir>/partsbid/token` on the current platform.
pub fn default_token_path() -> Result<PathBuf, AuthError> {
    let dirs = ProjectDirs::from("", "", "partsbid").ok_or(AuthError::NoDataDir)?;
    Ok(dirs.data_dir().join("token"))
}

fn normalize(token: String) -> Result<String, AuthError> {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return Err(AuthError::EmptyToken);
    }
    Ok(trimmed.to_string())
}
