use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the data directory from, in order of priority:
    /// 1. An explicit path (from --data-dir)
    /// 2. The DOCVEC_DATA_DIR environment variable
    /// 3. The XDG data directory (~/.local/share/docvec/)
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = if let Some(path) = explicit {
            path.to_path_buf()
        } else if let Ok(val) = std::env::var("DOCVEC_DATA_DIR") {
            PathBuf::from(val)
        } else {
            xdg::BaseDirectories::with_prefix("docvec")
                .get_data_home()
                .ok_or_else(|| {
                    Error::Config(
                        "could not determine XDG data home directory".into(),
                    )
                })?
        };

        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_db(&self) -> PathBuf {
        self.root.join("config.redb")
    }

    /// Directory holding the committed index generations.
    pub fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.root.join("backup")
    }

    /// Remove the index state, keeping settings.
    ///
    /// With `backup`, the state directory is first copied to `backup/`,
    /// replacing any earlier backup. Returns whether there was anything to
    /// remove.
    pub fn reset(&self, backup: bool) -> Result<bool> {
        let state = self.state_dir();
        if !state.exists() {
            return Ok(false);
        }

        if backup {
            let target = self.backup_dir();
            if target.exists() {
                std::fs::remove_dir_all(&target)?;
            }
            copy_dir(&state, &target)?;
            info!(backup = %target.display(), "index state backed up");
        }

        std::fs::remove_dir_all(&state)?;
        info!(path = %state.display(), "index state removed");
        Ok(true)
    }
}

fn copy_dir(from: &Path, to: &Path) -> Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let dest = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &dest)?;
        } else {
            std::fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}
