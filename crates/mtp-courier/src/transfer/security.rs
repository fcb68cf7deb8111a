//! Path security for local files taking part in a transfer.
//!
//! Sources must be real files (not symlinks) whose canonical path lies under a permitted
//! root. Destinations must resolve, through their nearest existing ancestor, under a
//! permitted root.

use log::{debug, warn};
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use crate::errors::{AdmissionError, CourierError};

/// Maximum folder name length in bytes.
pub const MAX_NAME_BYTES: usize = 255;

pub struct PathPolicy {
    /// Canonicalized. Roots that don't exist are dropped.
    roots: Vec<PathBuf>,
    max_path_bytes: usize,
}

impl PathPolicy {
    pub fn new(roots: Vec<PathBuf>, max_path_bytes: usize) -> Self {
        let roots = roots
            .into_iter()
            .filter_map(|root| match fs::canonicalize(&root) {
                Ok(canonical) => Some(canonical),
                Err(e) => {
                    debug!("Permitted root {} unusable: {}", root.display(), e);
                    None
                }
            })
            .collect::<Vec<_>>();
        if roots.is_empty() {
            warn!("No permitted roots exist, every transfer will be rejected");
        }
        Self { roots, max_path_bytes }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Checks a file or folder about to be read. Returns its canonical path.
    pub fn check_source(&self, path: &Path) -> Result<PathBuf, AdmissionError> {
        self.check_lexical(path)?;

        let meta = fs::symlink_metadata(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => AdmissionError::SourceMissing {
                path: path.display().to_string(),
            },
            _ => AdmissionError::unreadable(path, &e),
        })?;
        if meta.file_type().is_symlink() {
            return Err(AdmissionError::SymbolicLink {
                path: path.display().to_string(),
            });
        }

        let canonical = fs::canonicalize(path).map_err(|e| AdmissionError::unreadable(path, &e))?;
        self.check_under_roots(path, &canonical)?;
        Ok(canonical)
    }

    /// Checks a local path about to be written. The file itself may not exist yet.
    pub fn check_destination(&self, path: &Path) -> Result<PathBuf, AdmissionError> {
        self.check_lexical(path)?;

        if let Ok(meta) = fs::symlink_metadata(path)
            && meta.file_type().is_symlink()
        {
            return Err(AdmissionError::SymbolicLink {
                path: path.display().to_string(),
            });
        }

        // Walk up to the nearest ancestor that exists, then re-attach the missing tail.
        let mut existing = path;
        let mut tail = Vec::new();
        while !existing.exists() {
            let (Some(parent), Some(name)) = (existing.parent(), existing.file_name()) else {
                return Err(AdmissionError::OutsidePermittedRoots {
                    path: path.display().to_string(),
                });
            };
            tail.push(name.to_os_string());
            existing = parent;
        }

        let mut resolved = fs::canonicalize(existing).map_err(|e| AdmissionError::unreadable(existing, &e))?;
        for name in tail.iter().rev() {
            resolved.push(name);
        }
        self.check_under_roots(path, &resolved)?;
        Ok(resolved)
    }

    /// Checks that don't touch the file system.
    fn check_lexical(&self, path: &Path) -> Result<(), AdmissionError> {
        let display = path.display().to_string();
        if !path.is_absolute() {
            return Err(AdmissionError::RelativePath { path: display });
        }
        let bytes = path.as_os_str().len();
        if bytes > self.max_path_bytes {
            return Err(AdmissionError::PathTooLong {
                bytes,
                max: self.max_path_bytes,
            });
        }
        if path.to_string_lossy().chars().any(char::is_control) {
            return Err(AdmissionError::ControlCharacter { path: display });
        }
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(AdmissionError::PathTraversal { path: display });
        }
        Ok(())
    }

    fn check_under_roots(&self, original: &Path, canonical: &Path) -> Result<(), AdmissionError> {
        if self.roots.iter().any(|root| canonical.starts_with(root)) {
            Ok(())
        } else {
            warn!(
                "Rejected {} (resolves to {}): outside permitted roots",
                original.display(),
                canonical.display()
            );
            Err(AdmissionError::OutsidePermittedRoots {
                path: original.display().to_string(),
            })
        }
    }
}

/// Validates a folder name for creation on the device.
pub fn validate_folder_name(name: &str) -> Result<(), CourierError> {
    let invalid = |reason: String| CourierError::InvalidName {
        name: name.to_string(),
        reason,
    };
    if name.trim().is_empty() {
        return Err(invalid("Name can't be empty".to_string()));
    }
    if let Some(c) = name.chars().find(|c| *c == '/' || *c == '\0') {
        let shown = if c == '\0' { "NUL".to_string() } else { c.to_string() };
        return Err(invalid(format!("Name contains a disallowed character: {shown}")));
    }
    if name.len() >= MAX_NAME_BYTES {
        return Err(invalid(format!(
            "Name is {} bytes, which exceeds the {} byte limit",
            name.len(),
            MAX_NAME_BYTES - 1
        )));
    }
    Ok(())
}
