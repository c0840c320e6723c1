use anyhow::{Context, Result};
use log::{debug, info};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::domain::document::{Document, DocumentId};
use crate::error::EpistolaryError;
use crate::store::DocumentManager;
use crate::store::naming::{id_to_stem, stem_to_id};

pub const OUTBOX_DIR: &str = "outbox";

/// Documents as PDF files: `<root>/<id>.pdf` for the inbox and
/// `<root>/outbox/<id>.pdf` for replies. No locking between processes.
pub struct FilesystemDocumentManager {
    root: PathBuf,
}

impl FilesystemDocumentManager {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(OUTBOX_DIR))
            .with_context(|| format!("creating document directory {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn inbox_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.pdf", id_to_stem(id)))
    }

    fn outbox_path(&self, id: &str) -> PathBuf {
        self.root
            .join(OUTBOX_DIR)
            .join(format!("{}.pdf", id_to_stem(id)))
    }

    fn list_dir(&self, dir: &Path) -> Result<Vec<DocumentId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some(stem) = name.strip_suffix(".pdf") {
                ids.push(stem_to_id(stem)?);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

impl DocumentManager for FilesystemDocumentManager {
    fn list_documents(&self) -> Result<Vec<DocumentId>> {
        self.list_dir(&self.root)
    }

    fn get_document(&self, id: &str) -> Result<Document> {
        let path = [self.inbox_path(id), self.outbox_path(id)]
            .into_iter()
            .find(|p| p.exists())
            .ok_or_else(|| EpistolaryError::DocumentNotFound { id: id.to_string() })?;
        let bytes = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        Document::from_bytes(&bytes).with_context(|| format!("parsing {}", path.display()))
    }

    fn has_document(&self, id: &str) -> Result<bool> {
        Ok(self.inbox_path(id).exists() || self.outbox_path(id).exists())
    }

    fn put_document(&self, document: &Document, requested_id: &str) -> Result<DocumentId> {
        if self.outbox_path(requested_id).exists() {
            return Err(EpistolaryError::DocumentExists {
                id: requested_id.to_string(),
            }
            .into());
        }
        let bytes = document.to_bytes()?;
        let path = self.inbox_path(requested_id);

        // a half-written file must never look like a stored document
        let mut staged = NamedTempFile::new_in(&self.root)
            .with_context(|| format!("staging in {}", self.root.display()))?;
        staged.write_all(&bytes)?;
        staged.as_file().sync_all()?;
        match staged.persist_noclobber(&path) {
            Ok(_) => {}
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                return Err(EpistolaryError::DocumentExists {
                    id: requested_id.to_string(),
                }
                .into());
            }
            Err(e) => {
                return Err(e.error).with_context(|| format!("creating {}", path.display()));
            }
        }
        debug!("wrote {}", path.display());
        Ok(requested_id.to_string())
    }

    fn delete_document(&self, id: &str) -> Result<bool> {
        for path in [self.inbox_path(id), self.outbox_path(id)] {
            match fs::remove_file(&path) {
                Ok(()) => {
                    info!("deleted {}", path.display());
                    return Ok(true);
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e).with_context(|| format!("deleting {}", path.display())),
            }
        }
        Ok(false)
    }

    fn list_edited_documents(&self) -> Result<Vec<DocumentId>> {
        self.list_dir(&self.root.join(OUTBOX_DIR))
    }

    fn get_edited_document(&self, id: &str) -> Result<Document> {
        let path = self.outbox_path(id);
        if !path.exists() {
            return Err(EpistolaryError::DocumentNotFound { id: id.to_string() }.into());
        }
        let bytes = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        Document::from_bytes(&bytes).with_context(|| format!("parsing {}", path.display()))
    }

    fn delete_edited_document(&self, id: &str) -> Result<bool> {
        let path = self.outbox_path(id);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("deleted {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("deleting {}", path.display())),
        }
    }
}
