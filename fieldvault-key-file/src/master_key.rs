use fieldvault::error::Error;
use fieldvault::master_key::{MasterKey, MasterKeySource, MASTER_KEY_SIZE};
use secrecy::SecretVec;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// Master key persisted in a single file.
///
/// Loading creates the file with a fresh key when it does not exist yet, so
/// the first start of an application provisions the key and every later start
/// reuses it. Concurrent first starts agree on one key.
#[derive(Debug, Clone)]
pub struct FileMasterKey {
    path: PathBuf,
}

impl FileMasterKey {
    /// Uses the key file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Writes a fresh key to `path`, refusing to overwrite an existing file.
    ///
    /// # Errors
    ///
    /// Returns `Error::MasterKeyUnavailable` if the file exists or cannot be
    /// written.
    pub fn generate(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let source = Self::new(path);
        let key = MasterKey::generate();
        match publish(&source.path, key.expose()) {
            Ok(()) => {
                info!(path = %source.path.display(), "generated master key");
                Ok(source)
            }
            Err(e) => Err(source.unavailable(&e)),
        }
    }

    /// Returns the key file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> io::Result<Option<MasterKey>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let len = bytes.len();
        MasterKey::new(SecretVec::new(bytes)).map(Some).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("expected {MASTER_KEY_SIZE} bytes, found {len}"),
            )
        })
    }

    fn unavailable(&self, err: &io::Error) -> Error {
        Error::MasterKeyUnavailable(format!("{}: {err}", self.path.display()))
    }
}

impl MasterKeySource for FileMasterKey {
    fn load(&self) -> Result<MasterKey, Error> {
        if let Some(key) = self.read().map_err(|e| self.unavailable(&e))? {
            debug!(path = %self.path.display(), "loaded master key");
            return Ok(key);
        }

        let key = MasterKey::generate();
        match publish(&self.path, key.expose()) {
            Ok(()) => {
                info!(path = %self.path.display(), "created master key");
                Ok(key)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!(path = %self.path.display(), "master key created concurrently");
                self.read()
                    .map_err(|e| self.unavailable(&e))?
                    .ok_or_else(|| self.unavailable(&io::ErrorKind::NotFound.into()))
            }
            Err(e) => Err(self.unavailable(&e)),
        }
    }
}

/// Writes `contents` to a temporary sibling and links it into place.
fn publish(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let temp = dir.join(format!(".master-{}.tmp", Uuid::new_v4()));
    let result = write_private(&temp, contents).and_then(|()| std::fs::hard_link(&temp, path));
    let _ = std::fs::remove_file(&temp);
    result
}

fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}
