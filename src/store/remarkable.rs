//! Documents on a reMarkable tablet, reached through the `rmapi` CLI.
//!
//! The tablet hands documents back as archives of its own format, so every
//! read is download → unzip → `remarks` → PDF. Deleting means moving the
//! document into an archive folder on the tablet.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use tempfile::TempDir;

use crate::domain::document::{Document, DocumentId};
use crate::error::EpistolaryError;
use crate::process::remarks::Remarks;
use crate::process::rmapi::{RemotePathKind, Rmapi};
use crate::process::{CommandRunner, ProcessError};
use crate::store::DocumentManager;
use crate::store::naming::{id_to_stem, stem_to_id};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemarkableOptions {
    /// Folder on the tablet holding synced mail.
    pub root: String,
    pub rmapi: String,
    pub remarks: String,
    /// Where downloads and conversions happen; a temporary directory if unset.
    pub cache_dir: Option<PathBuf>,
}

impl Default for RemarkableOptions {
    fn default() -> Self {
        Self {
            root: "Emails".to_string(),
            rmapi: "rmapi".to_string(),
            remarks: "remarks".to_string(),
            cache_dir: None,
        }
    }
}

pub struct RemarkableDocumentManager {
    rmapi: Rmapi,
    remarks: Remarks,
    cache_dir: PathBuf,
    // removed on drop when the cache was not configured
    _temp_cache: Option<TempDir>,
    root: String,
}

impl RemarkableDocumentManager {
    pub fn new(runner: Rc<dyn CommandRunner>, options: RemarkableOptions) -> Result<Self> {
        let (cache_dir, temp_cache) = match options.cache_dir {
            Some(dir) => {
                fs::create_dir_all(&dir)
                    .with_context(|| format!("creating cache dir {}", dir.display()))?;
                (dir, None)
            }
            None => {
                let tmp = tempfile::tempdir()?;
                (tmp.path().to_path_buf(), Some(tmp))
            }
        };

        let rmapi = Rmapi::new(runner.clone(), options.rmapi, &cache_dir);
        let remarks = Remarks::new(runner, options.remarks);
        let version = rmapi.version()?;
        debug!("rmapi {version}");
        remarks.version()?;

        let manager = Self {
            rmapi,
            remarks,
            cache_dir,
            _temp_cache: temp_cache,
            root: options.root.trim_end_matches('/').to_string(),
        };
        manager.provision()?;
        Ok(manager)
    }

    fn outbox(&self) -> String {
        format!("{}/Outbox", self.root)
    }

    fn archive(&self) -> String {
        format!("{}/Archive", self.root)
    }

    fn provision(&self) -> Result<()> {
        for dir in [self.root.clone(), self.outbox(), self.archive()] {
            match self.rmapi.mkdir(&dir) {
                Ok(()) => info!("created {dir} on the tablet"),
                // rmapi refuses to create a folder that is already there
                Err(ProcessError::Failed { stderr, .. }) => debug!("mkdir {dir}: {stderr}"),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn files_in(&self, dir: &str) -> Result<Vec<DocumentId>> {
        let mut ids = Vec::new();
        for entry in self.rmapi.ls(dir)? {
            if entry.kind == RemotePathKind::File {
                ids.push(stem_to_id(&entry.name)?);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Remote folder currently holding `id`, if any.
    fn locate(&self, id: &str) -> Result<Option<String>> {
        for dir in [self.root.clone(), self.outbox()] {
            if self.files_in(&dir)?.iter().any(|d| d == id) {
                return Ok(Some(dir));
            }
        }
        Ok(None)
    }

    fn fetch(&self, remote_dir: &str, id: &str) -> Result<Document> {
        let stem = id_to_stem(id);
        let archive = self.rmapi.download(&format!("{remote_dir}/{stem}"))?;
        let pdf_path = self.cache_dir.join(format!("{stem}.pdf"));
        self.remarks.archive_to_pdf(&archive, &pdf_path)?;

        let bytes = fs::read(&pdf_path)
            .with_context(|| format!("reading converted {}", pdf_path.display()))?;
        let _ = fs::remove_file(&archive);
        let _ = fs::remove_file(&pdf_path);
        Document::from_bytes(&bytes)
    }
}

impl DocumentManager for RemarkableDocumentManager {
    fn list_documents(&self) -> Result<Vec<DocumentId>> {
        self.files_in(&self.root)
    }

    fn get_document(&self, id: &str) -> Result<Document> {
        let dir = self
            .locate(id)?
            .ok_or_else(|| EpistolaryError::DocumentNotFound { id: id.to_string() })?;
        self.fetch(&dir, id)
    }

    fn has_document(&self, id: &str) -> Result<bool> {
        Ok(self.locate(id)?.is_some())
    }

    fn put_document(&self, document: &Document, requested_id: &str) -> Result<DocumentId> {
        if self.has_document(requested_id)? {
            return Err(EpistolaryError::DocumentExists {
                id: requested_id.to_string(),
            }
            .into());
        }

        // rmapi names the remote document after the local file
        let staging = tempfile::tempdir_in(&self.cache_dir)?;
        let local = staging.path().join(format!("{}.pdf", id_to_stem(requested_id)));
        fs::write(&local, document.to_bytes()?)?;
        self.rmapi.upload(&local, &self.root)?;
        info!("uploaded {requested_id} to {}", self.root);
        Ok(requested_id.to_string())
    }

    fn delete_document(&self, id: &str) -> Result<bool> {
        let stem = id_to_stem(id);
        let archive = self.archive();
        for dir in [self.root.clone(), self.outbox()] {
            match self.rmapi.mv(&format!("{dir}/{stem}"), &archive) {
                Ok(()) => {
                    info!("archived {id} from {dir}");
                    return Ok(true);
                }
                Err(e) => debug!("moving {id} out of {dir}: {e}"),
            }
        }
        warn!("could not archive {id}: not found in {} or {}", self.root, self.outbox());
        Ok(false)
    }

    fn list_edited_documents(&self) -> Result<Vec<DocumentId>> {
        self.files_in(&self.outbox())
    }

    fn get_edited_document(&self, id: &str) -> Result<Document> {
        let outbox = self.outbox();
        if !self.files_in(&outbox)?.iter().any(|d| d == id) {
            return Err(EpistolaryError::DocumentNotFound { id: id.to_string() }.into());
        }
        self.fetch(&outbox, id)
    }

    fn delete_edited_document(&self, id: &str) -> Result<bool> {
        let from = format!("{}/{}", self.outbox(), id_to_stem(id));
        match self.rmapi.mv(&from, &self.archive()) {
            Ok(()) => {
                info!("archived {id} from {}", self.outbox());
                Ok(true)
            }
            Err(e) => {
                warn!("could not archive {id} from {}: {e}", self.outbox());
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::Invocation;
    use crate::render::render_lines;
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::path::Path;

    /// Pretends to be rmapi, unzip and remarks against an in-memory tablet.
    /// Archives are just the PDF bytes.
    #[derive(Default)]
    struct FakeTablet {
        folders: RefCell<BTreeMap<String, BTreeMap<String, Vec<u8>>>>,
        calls: RefCell<Vec<String>>,
    }

    impl FakeTablet {
        fn failed(&self, msg: &str) -> ProcessError {
            ProcessError::Failed {
                program: "fake".into(),
                status: "exit status: 1".into(),
                stderr: msg.into(),
            }
        }

        fn split(path: &str) -> (String, String) {
            let (dir, name) = path.rsplit_once('/').unwrap_or(("", path));
            (dir.to_string(), name.to_string())
        }
    }

    impl CommandRunner for FakeTablet {
        fn run(&self, inv: &Invocation) -> Result<Vec<u8>, ProcessError> {
            let args: Vec<&str> = inv.args.iter().map(String::as_str).collect();
            self.calls
                .borrow_mut()
                .push(format!("{} {}", inv.program, args.join(" ")));
            let mut folders = self.folders.borrow_mut();

            match (inv.program.as_str(), args.as_slice()) {
                (_, ["version"]) | (_, ["--version"]) => Ok(b"1.0".to_vec()),
                ("rmapi", ["mkdir", dir]) => {
                    if folders.contains_key(*dir) {
                        return Err(self.failed("entry already exists"));
                    }
                    folders.insert(dir.to_string(), BTreeMap::new());
                    Ok(vec![])
                }
                ("rmapi", ["ls", dir]) => {
                    let mut out = String::new();
                    for f in folders.keys() {
                        if let Some(child) = f.strip_prefix(&format!("{dir}/")) {
                            out.push_str(&format!("[d]\t{child}\n"));
                        }
                    }
                    for name in folders.get(*dir).map(|f| f.keys()).into_iter().flatten() {
                        out.push_str(&format!("[f]\t{name}\n"));
                    }
                    Ok(out.into_bytes())
                }
                ("rmapi", ["put", local, dir]) => {
                    let local = Path::new(local);
                    let name = local.file_stem().unwrap().to_string_lossy().into_owned();
                    let bytes = fs::read(local).unwrap();
                    folders.get_mut(*dir).unwrap().insert(name, bytes);
                    Ok(vec![])
                }
                ("rmapi", ["mv", from, to]) => {
                    let (dir, name) = Self::split(from);
                    let bytes = folders
                        .get_mut(&dir)
                        .and_then(|f| f.remove(&name))
                        .ok_or_else(|| self.failed("file does not exist"))?;
                    folders.get_mut(*to).unwrap().insert(name, bytes);
                    Ok(vec![])
                }
                ("rmapi", ["get", path]) => {
                    let (dir, name) = Self::split(path);
                    let bytes = folders[&dir].get(&name).cloned().unwrap();
                    let cwd = inv.cwd.as_ref().unwrap();
                    fs::write(cwd.join(format!("{name}.zip")), bytes).unwrap();
                    Ok(vec![])
                }
                ("unzip", ["-o", archive, "-d", dir]) => {
                    fs::copy(archive, Path::new(dir).join("content")).unwrap();
                    Ok(vec![])
                }
                ("remarks", [input, output]) => {
                    fs::copy(Path::new(input).join("content"), Path::new(output).join("out.pdf"))
                        .unwrap();
                    Ok(vec![])
                }
                _ => Err(self.failed("unexpected invocation")),
            }
        }
    }

    fn manager(tablet: Rc<FakeTablet>, cache: &Path) -> RemarkableDocumentManager {
        RemarkableDocumentManager::new(
            tablet,
            RemarkableOptions {
                cache_dir: Some(cache.to_path_buf()),
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn move_to_outbox(tablet: &FakeTablet, stem: &str) {
        let mv = Invocation::new("rmapi")
            .arg("mv")
            .arg(format!("Emails/{stem}"))
            .arg("Emails/Outbox");
        tablet.run(&mv).unwrap();
    }

    fn doc(text: &str) -> Document {
        render_lines(&[(text.to_string(), false)]).unwrap()
    }

    #[test]
    fn provisioning_is_idempotent() {
        let cache = tempfile::tempdir().unwrap();
        let tablet = Rc::new(FakeTablet::default());
        manager(tablet.clone(), cache.path());
        manager(tablet.clone(), cache.path());
        let folders: Vec<String> = tablet.folders.borrow().keys().cloned().collect();
        assert_eq!(folders, vec!["Emails", "Emails/Archive", "Emails/Outbox"]);
    }

    #[test]
    fn upload_then_download_roundtrips() {
        let cache = tempfile::tempdir().unwrap();
        let tablet = Rc::new(FakeTablet::default());
        let store = manager(tablet.clone(), cache.path());

        store.put_document(&doc("hello tablet"), "<m/1@x>").unwrap();
        assert_eq!(store.list_documents().unwrap(), vec!["<m/1@x>".to_string()]);
        assert!(tablet.folders.borrow()["Emails"].contains_key("%3Cm%2F1@x%3E"));

        let fetched = store.get_document("<m/1@x>").unwrap();
        assert_eq!(fetched.page_text(1).unwrap(), vec!["hello tablet"]);
    }

    #[test]
    fn put_conflicts_with_inbox_and_outbox() {
        let cache = tempfile::tempdir().unwrap();
        let tablet = Rc::new(FakeTablet::default());
        let store = manager(tablet.clone(), cache.path());
        store.put_document(&doc("a"), "<a@x>").unwrap();

        let err = store.put_document(&doc("b"), "<a@x>").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EpistolaryError>(),
            Some(EpistolaryError::DocumentExists { .. })
        ));

        move_to_outbox(&tablet, "%3Ca@x%3E");
        assert!(store.list_documents().unwrap().is_empty());
        assert_eq!(store.list_edited_documents().unwrap(), vec!["<a@x>".to_string()]);
        assert!(store.put_document(&doc("c"), "<a@x>").is_err());
    }

    #[test]
    fn delete_falls_back_to_outbox_then_reports_false() {
        let cache = tempfile::tempdir().unwrap();
        let tablet = Rc::new(FakeTablet::default());
        let store = manager(tablet.clone(), cache.path());
        store.put_document(&doc("a"), "<a@x>").unwrap();
        move_to_outbox(&tablet, "%3Ca@x%3E");

        assert!(store.delete_document("<a@x>").unwrap());
        assert!(tablet.folders.borrow()["Emails/Archive"].contains_key("%3Ca@x%3E"));
        assert!(!store.delete_document("<a@x>").unwrap());
    }

    #[test]
    fn edited_copy_wins_over_inbox_copy() {
        let cache = tempfile::tempdir().unwrap();
        let tablet = Rc::new(FakeTablet::default());
        let store = manager(tablet.clone(), cache.path());
        store.put_document(&doc("blank"), "<a@x>").unwrap();
        let annotated = doc("my reply").to_bytes().unwrap();
        tablet
            .folders
            .borrow_mut()
            .get_mut("Emails/Outbox")
            .unwrap()
            .insert("%3Ca@x%3E".to_string(), annotated);

        let edited = store.get_edited_document("<a@x>").unwrap();
        assert_eq!(edited.page_text(1).unwrap(), vec!["my reply"]);

        assert!(store.delete_edited_document("<a@x>").unwrap());
        assert!(store.list_edited_documents().unwrap().is_empty());
        assert_eq!(store.list_documents().unwrap(), vec!["<a@x>".to_string()]);
        assert!(!store.delete_edited_document("<a@x>").unwrap());
        assert!(store.get_edited_document("<a@x>").is_err());
    }

    #[test]
    fn missing_rmapi_fails_construction() {
        struct Nothing;
        impl CommandRunner for Nothing {
            fn run(&self, inv: &Invocation) -> Result<Vec<u8>, ProcessError> {
                Err(ProcessError::NotFound {
                    program: inv.program.clone(),
                })
            }
        }
        let cache = tempfile::tempdir().unwrap();
        let err = RemarkableDocumentManager::new(
            Rc::new(Nothing),
            RemarkableOptions {
                cache_dir: Some(cache.path().to_path_buf()),
                ..Default::default()
            },
        )
        .err()
        .unwrap();
        assert!(matches!(
            err.downcast_ref::<ProcessError>(),
            Some(ProcessError::NotFound { .. })
        ));
    }
}
