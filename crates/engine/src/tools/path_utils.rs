//! Path confinement for working-directory-scoped tools

use std::path::{Path, PathBuf};

/// Error for paths that resolve outside the task working directory
#[derive(Debug, Clone)]
pub struct PathConfinementError {
    pub path: String,
    pub working_dir: String,
}

impl std::fmt::Display for PathConfinementError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "path {} is outside the working directory {}",
            self.path, self.working_dir
        )
    }
}

impl std::error::Error for PathConfinementError {}

/// Resolve a tool-supplied path against the task working directory and
/// confine it there.
///
/// Relative paths are joined to the working directory, `~/` is expanded, and
/// the result is canonicalized where it exists so symlink and `..` escapes
/// are caught. Paths that resolve outside the working directory are rejected.
pub async fn confine_to_working_dir(
    path: &str,
    working_dir: &Path,
) -> Result<PathBuf, Box<dyn std::error::Error + Send + Sync>> {
    let expanded = if !path.starts_with('/') && !path.starts_with('~') {
        working_dir.join(path)
    } else {
        expand_tilde(path)
    };

    // Canonicalize through the deepest existing ancestor so symlinks and
    // parent-dir components resolve even for paths that do not exist yet.
    let absolute = if expanded.exists() {
        match tokio::fs::canonicalize(&expanded).await {
            Ok(p) => p,
            Err(_) => std::env::current_dir()?.join(&expanded),
        }
    } else {
        let parent = expanded.parent().filter(|p| !p.as_os_str().is_empty());
        let file_name = expanded.file_name();

        if let Some(parent) = parent {
            let canonical_parent = if parent.exists() {
                tokio::fs::canonicalize(parent)
                    .await
                    .unwrap_or_else(|_| parent.to_path_buf())
            } else {
                std::env::current_dir()?.join(parent)
            };

            match file_name {
                Some(file_name) => canonical_parent.join(file_name),
                None => canonical_parent,
            }
        } else {
            std::env::current_dir()?.join(&expanded)
        }
    };

    let canonical_root = if working_dir.exists() {
        tokio::fs::canonicalize(working_dir)
            .await
            .unwrap_or_else(|_| working_dir.to_path_buf())
    } else {
        working_dir.to_path_buf()
    };

    if !absolute.starts_with(&canonical_root) {
        return Err(Box::new(PathConfinementError {
            path: path.to_string(),
            working_dir: canonical_root.display().to_string(),
        }));
    }

    Ok(absolute)
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
