use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Session token persisted in a single file between runs.
#[derive(Debug, Clone)]
pub struct TokenStore {
  path: PathBuf,
}

impl TokenStore {
  /// Token store at `path`, or at the default location.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    match path {
      Some(p) => Ok(Self::at(p)),
      None => Ok(Self::at(&Self::default_path()?)),
    }
  }

  pub fn at(path: &Path) -> Self {
    Self {
      path: path.to_path_buf(),
    }
  }

  /// Get the default token path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("pwa-gate").join("token"))
  }

  /// The stored token, if any. A blank file counts as no token.
  pub fn get(&self) -> Result<Option<String>> {
    match std::fs::read_to_string(&self.path) {
      Ok(contents) => {
        let token = contents.trim();
        Ok((!token.is_empty()).then(|| token.to_string()))
      }
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(eyre!("Failed to read token file {}: {}", self.path.display(), e)),
    }
  }

  pub fn set(&self, token: &str) -> Result<()> {
    if let Some(parent) = self.path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create token directory: {}", e))?;
    }
    std::fs::write(&self.path, token)
      .map_err(|e| eyre!("Failed to write token file {}: {}", self.path.display(), e))?;

    #[cfg(unix)]
    {
      use std::os::unix::fs::PermissionsExt;
      std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| eyre!("Failed to restrict token file {}: {}", self.path.display(), e))?;
    }

    debug!(path = %self.path.display(), "Token stored");
    Ok(())
  }

  /// Remove the stored token. Returns whether one was present.
  pub fn clear(&self) -> Result<bool> {
    match std::fs::remove_file(&self.path) {
      Ok(()) => {
        debug!(path = %self.path.display(), "Token cleared");
        Ok(true)
      }
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
      Err(e) => Err(eyre!("Failed to remove token file {}: {}", self.path.display(), e)),
    }
  }
}
