//! Turns the selectors in [`Config`] into the concrete components.

use anyhow::Result;
use log::debug;
use std::rc::Rc;

use crate::config::{Config, DocumentManagerKind, MailboxManagerKind, TextExtractorKind};
use crate::extract::TextExtractor;
use crate::extract::openai::OpenAiTextExtractor;
use crate::extract::raster::Rasterizer;
use crate::extract::tesseract::TesseractTextExtractor;
use crate::mail::MailboxManager;
use crate::mail::smtp_imap::SmtpImapMailbox;
use crate::orchestrator::{Orchestrator, SyncOptions};
use crate::process::{CommandRunner, SystemRunner};
use crate::store::DocumentManager;
use crate::store::filesystem::FilesystemDocumentManager;
use crate::store::remarkable::RemarkableDocumentManager;

pub struct Components {
    pub mailbox: Box<dyn MailboxManager>,
    pub documents: Box<dyn DocumentManager>,
    pub extractor: Box<dyn TextExtractor>,
    sync: SyncOptions,
}

impl Components {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::with_runner(cfg, Rc::new(SystemRunner))
    }

    /// Like [`Components::from_config`], with external tools run by `runner`.
    pub fn with_runner(cfg: &Config, runner: Rc<dyn CommandRunner>) -> Result<Self> {
        Ok(Self {
            mailbox: build_mailbox(cfg)?,
            documents: build_documents(cfg, runner.clone())?,
            extractor: build_extractor(cfg, runner)?,
            sync: cfg.sync_options(),
        })
    }

    pub fn orchestrator(&self) -> Orchestrator<'_> {
        Orchestrator::new(
            self.mailbox.as_ref(),
            self.documents.as_ref(),
            self.extractor.as_ref(),
            self.sync.clone(),
        )
    }
}

pub fn build_mailbox(cfg: &Config) -> Result<Box<dyn MailboxManager>> {
    match cfg.mailbox_manager {
        MailboxManagerKind::SmtpImap => Ok(Box::new(SmtpImapMailbox::new(
            cfg.imap_account()?,
            cfg.smtp_account()?,
            cfg.email.clone(),
        ))),
    }
}

pub fn build_documents(
    cfg: &Config,
    runner: Rc<dyn CommandRunner>,
) -> Result<Box<dyn DocumentManager>> {
    debug!("document manager: {:?}", cfg.document_manager);
    let documents: Box<dyn DocumentManager> = match cfg.document_manager {
        DocumentManagerKind::Files => Box::new(FilesystemDocumentManager::new(cfg.files_root())?),
        DocumentManagerKind::Remarkable => Box::new(RemarkableDocumentManager::new(
            runner,
            cfg.remarkable_options(),
        )?),
    };
    Ok(documents)
}

pub fn build_extractor(
    cfg: &Config,
    runner: Rc<dyn CommandRunner>,
) -> Result<Box<dyn TextExtractor>> {
    debug!("text extractor: {:?}", cfg.text_extractor);
    let rasterizer = Rasterizer::new(runner.clone(), cfg.raster.clone());
    let extractor: Box<dyn TextExtractor> = match cfg.text_extractor {
        TextExtractorKind::Tesseract => Box::new(TesseractTextExtractor::new(
            rasterizer,
            runner,
            cfg.tesseract.clone(),
        )),
        TextExtractorKind::OpenAi => {
            Box::new(OpenAiTextExtractor::new(rasterizer, cfg.openai.clone())?)
        }
    };
    Ok(extractor)
}
