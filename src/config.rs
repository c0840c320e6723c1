use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::document::ReplyPage;
use crate::error::EpistolaryError;
use crate::extract::openai::OpenAiOptions;
use crate::extract::raster::RasterOptions;
use crate::extract::tesseract::TesseractOptions;
use crate::mail::DEFAULT_FOLDER;
use crate::mail::smtp_imap::ServerAccount;
use crate::orchestrator::SyncOptions;
use crate::secrets;
use crate::store::remarkable::RemarkableOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MailboxManagerKind {
    #[default]
    SmtpImap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentManagerKind {
    Files,
    #[default]
    Remarkable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextExtractorKind {
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    Tesseract,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Base64 of the password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct FilesSection {
    /// `~` is expanded.
    pub root: PathBuf,
}

impl Default for FilesSection {
    fn default() -> Self {
        Self {
            root: PathBuf::from("~/Epistolary"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub email: String,
    /// Base64 of the account password. The OS keyring is asked when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub ignore_marketing_emails: bool,
    pub folder: String,
    pub fetch_limit: usize,
    pub mailbox_manager: MailboxManagerKind,
    pub document_manager: DocumentManagerKind,
    pub text_extractor: TextExtractorKind,
    pub reply_page: ReplyPage,

    pub imap: ServerSection,
    pub smtp: ServerSection,
    pub files: FilesSection,
    pub remarkable: RemarkableOptions,
    pub raster: RasterOptions,
    pub tesseract: TesseractOptions,
    pub openai: OpenAiOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            email: String::new(),
            password: None,
            ignore_marketing_emails: true,
            folder: DEFAULT_FOLDER.to_string(),
            fetch_limit: 10,
            mailbox_manager: MailboxManagerKind::default(),
            document_manager: DocumentManagerKind::default(),
            text_extractor: TextExtractorKind::default(),
            reply_page: ReplyPage::default(),
            imap: ServerSection::default(),
            smtp: ServerSection::default(),
            files: FilesSection::default(),
            remarkable: RemarkableOptions::default(),
            raster: RasterOptions::default(),
            tesseract: TesseractOptions::default(),
            openai: OpenAiOptions::default(),
        }
    }
}

pub const IMAPS_PORT: u16 = 993;
pub const SMTPS_PORT: u16 = 465;

fn config_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("no config dir available"))?
        .join("epistolary"))
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Base64 for the config file. An encoding, not protection.
pub fn encode_password(password: &str) -> String {
    STANDARD.encode(password)
}

fn decode_password(field: &str, encoded: &str) -> Result<String> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| EpistolaryError::Config(format!("{field} is not valid base64: {e}")))?;
    Ok(String::from_utf8(bytes)
        .map_err(|_| EpistolaryError::Config(format!("{field} does not decode to UTF-8")))?)
}

/// Replace a leading `~` with the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        if !path.exists() {
            return Err(EpistolaryError::Config(format!(
                "no config at {}; run `epistolary init` first",
                path.display()
            ))
            .into());
        }
        let s = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let cfg: Config = toml::from_str(&s).with_context(|| format!("parsing {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Write a new config file. An existing file is never replaced.
    pub fn save(&self, path: &Path) -> Result<()> {
        if path.exists() {
            return Err(EpistolaryError::Config(format!(
                "config already exists at {}",
                path.display()
            ))
            .into());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let missing = [
            ("email", self.email.is_empty()),
            ("imap.host", self.imap.host.is_empty()),
            ("smtp.host", self.smtp.host.is_empty()),
        ];
        for (field, empty) in missing {
            if empty {
                return Err(EpistolaryError::Config(format!("{field} is not set")).into());
            }
        }
        Ok(())
    }

    /// The account password: from the config when present, else the keyring.
    pub fn password(&self) -> Result<String> {
        if let Some(encoded) = &self.password {
            return decode_password("password", encoded);
        }
        secrets::load_password(&self.email)?.ok_or_else(|| {
            EpistolaryError::Config(format!(
                "no password for {} in the config or the keyring; run `epistolary set-password`",
                self.email
            ))
            .into()
        })
    }

    pub fn imap_account(&self) -> Result<ServerAccount> {
        Ok(ServerAccount {
            host: self.imap.host.clone(),
            port: self.imap.port.unwrap_or(IMAPS_PORT),
            username: self.imap.username.clone().unwrap_or_else(|| self.email.clone()),
            password: match &self.imap.password {
                Some(encoded) => decode_password("imap.password", encoded)?,
                None => self.password()?,
            },
        })
    }

    /// SMTP credentials, defaulting to the IMAP login.
    pub fn smtp_account(&self) -> Result<ServerAccount> {
        Ok(ServerAccount {
            host: self.smtp.host.clone(),
            port: self.smtp.port.unwrap_or(SMTPS_PORT),
            username: self.smtp.username.clone().unwrap_or_else(|| self.email.clone()),
            password: match &self.smtp.password {
                Some(encoded) => decode_password("smtp.password", encoded)?,
                None => self.password()?,
            },
        })
    }

    pub fn files_root(&self) -> PathBuf {
        expand_home(&self.files.root)
    }

    pub fn remarkable_options(&self) -> RemarkableOptions {
        let mut options = self.remarkable.clone();
        options.cache_dir = options.cache_dir.as_deref().map(expand_home);
        options
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            folder: self.folder.clone(),
            fetch_limit: Some(self.fetch_limit),
            ignore_marketing: self.ignore_marketing_emails,
            reply_page: self.reply_page,
        }
    }
}
