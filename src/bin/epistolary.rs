use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use std::io::{self, BufRead, Read, Write};
use std::path::PathBuf;

use epistolary::components::Components;
use epistolary::config::{
    Config, DocumentManagerKind, TextExtractorKind, default_config_path, encode_password,
};
use epistolary::daemon::{WatchConfig, run_watch};
use epistolary::mail::smtp_imap::SmtpImapMailbox;
use epistolary::secrets;

#[derive(Parser)]
#[command(name = "epistolary")]
#[command(about = "Read and answer email on a reMarkable tablet", long_about = None)]
struct Cli {
    /// Config file (default: <config dir>/epistolary/config.toml)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a new config file interactively
    Init {
        /// Log in to IMAP and SMTP before saving
        #[arg(long)]
        check_login: bool,
    },

    /// Put unread mail on the document store and clear out stale documents
    Receive,

    /// Send the replies waiting in the outbox
    Send,

    /// Receive and send in a loop until Ctrl-C
    Watch {
        #[arg(long, default_value_t = 300)]
        interval: u64,
    },

    /// Store the account password in the OS keyring
    SetPassword {
        /// Login name; the configured email address by default
        #[arg(long)]
        username: Option<String>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(p) => p,
        None => default_config_path()?,
    };

    match cli.cmd {
        Command::Init { check_login } => init(&config_path, check_login),

        Command::Receive => {
            let cfg = Config::load(&config_path)?;
            let components = Components::from_config(&cfg)?;
            let report = components.orchestrator().refresh()?;
            println!(
                "{} new document(s), {} removed, {} skipped",
                report.created.len(),
                report.deleted.len(),
                report.skipped.len()
            );
            Ok(())
        }

        Command::Send => {
            let cfg = Config::load(&config_path)?;
            let components = Components::from_config(&cfg)?;
            let report = components.orchestrator().send_outbox()?;
            println!("{} reply(ies) sent", report.sent.len());
            for id in &report.skipped_empty {
                println!("no handwriting found on the last page of {id}; left in the outbox");
            }
            for (id, why) in &report.failed {
                eprintln!("{id}: {why}");
            }
            for id in &report.undeleted {
                eprintln!("{id}: sent, but still in the outbox; remove it before the next send");
            }
            if !report.failed.is_empty() {
                Err(anyhow!("{} reply(ies) could not be sent", report.failed.len()))
            } else if !report.undeleted.is_empty() {
                Err(anyhow!(
                    "{} sent reply(ies) could not be removed from the outbox",
                    report.undeleted.len()
                ))
            } else {
                Ok(())
            }
        }

        Command::Watch { interval } => {
            let cfg = Config::load(&config_path)?;
            let components = Components::from_config(&cfg)?;
            run_watch(
                &components.orchestrator(),
                WatchConfig {
                    interval_secs: interval,
                },
            )
        }

        Command::SetPassword { username } => {
            let username = match username {
                Some(u) => u,
                None => Config::load(&config_path)?.email,
            };
            eprintln!("Paste password (end with Ctrl-D):");
            let mut password = String::new();
            io::stdin().read_to_string(&mut password)?;
            secrets::save_password(&username, password.trim())?;
            println!("Saved password for {username}");
            Ok(())
        }
    }
}

fn init(path: &std::path::Path, check_login: bool) -> Result<()> {
    if path.exists() {
        return Err(anyhow!("config file already exists at {}", path.display()));
    }
    println!("Creating a new config in {}", path.display());

    let mut cfg = Config {
        email: prompt("Email", None)?,
        ..Default::default()
    };
    let password = prompt_hidden("Password (stored base64-encoded; leave empty to use the keyring)")?;
    if !password.is_empty() {
        cfg.password = Some(encode_password(&password));
    }
    cfg.imap.host = prompt("IMAP host", None)?;
    cfg.imap.port = Some(prompt("IMAP port", Some("993"))?.parse()?);
    cfg.smtp.host = prompt("SMTP host", None)?;
    cfg.smtp.port = Some(prompt("SMTP port", Some("465"))?.parse()?);

    if confirm("Separate SMTP username and password?", false)? {
        cfg.smtp.username = Some(prompt("SMTP username", None)?);
        cfg.smtp.password = Some(encode_password(&prompt_required_hidden("SMTP password")?));
    }

    println!("Marketing mail is any message whose body mentions \"unsubscribe\".");
    cfg.ignore_marketing_emails = !confirm("Put marketing mail on the tablet too?", false)?;

    println!("Text extractors: 'openai' sends the reply page as an image to OpenAI; 'tesseract' runs OCR locally.");
    cfg.text_extractor = match prompt("Text extractor", Some("openai"))?.as_str() {
        "openai" => TextExtractorKind::OpenAi,
        "tesseract" => TextExtractorKind::Tesseract,
        other => return Err(anyhow!("unknown text extractor {other:?}")),
    };

    println!("Document managers: 'remarkable' uses the tablet through rmapi; 'files' writes PDFs to a directory.");
    cfg.document_manager = match prompt("Document manager", Some("remarkable"))?.as_str() {
        "remarkable" => DocumentManagerKind::Remarkable,
        "files" => {
            cfg.files.root = PathBuf::from(prompt("Directory", Some("~/Epistolary"))?);
            DocumentManagerKind::Files
        }
        other => return Err(anyhow!("unknown document manager {other:?}")),
    };
    cfg.validate()?;

    if check_login {
        println!("Logging in...");
        SmtpImapMailbox::new(cfg.imap_account()?, cfg.smtp_account()?, cfg.email.clone())
            .verify_login()?;
        println!("Login OK");
    }

    cfg.save(path)?;
    println!("Config written to {}", path.display());
    Ok(())
}

fn prompt(label: &str, default: Option<&str>) -> Result<String> {
    match default {
        Some(d) if !d.is_empty() => print!("{label} [{d}]: "),
        _ => print!("{label}: "),
    }
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let answer = line.trim();
    match (answer.is_empty(), default) {
        (true, Some(d)) => Ok(d.to_string()),
        (true, None) => Err(anyhow!("{label} is required")),
        (false, _) => Ok(answer.to_string()),
    }
}

/// Read a line from the terminal without echoing it.
fn prompt_hidden(label: &str) -> Result<String> {
    print!("{label}: ");
    io::stdout().flush()?;

    terminal::enable_raw_mode()?;
    let mut line = String::new();
    let outcome = loop {
        let key = match event::read() {
            Ok(Event::Key(key)) => key,
            Ok(_) => continue,
            Err(e) => break Err(e.into()),
        };
        match edit_hidden(&mut line, key) {
            HiddenInput::More => {}
            HiddenInput::Done => break Ok(()),
            HiddenInput::Cancelled => break Err(anyhow!("{label}: cancelled")),
        }
    };
    terminal::disable_raw_mode()?;
    println!();
    outcome.map(|()| line)
}

fn prompt_required_hidden(label: &str) -> Result<String> {
    let answer = prompt_hidden(label)?;
    if answer.is_empty() {
        return Err(anyhow!("{label} is required"));
    }
    Ok(answer)
}

#[derive(Debug, PartialEq, Eq)]
enum HiddenInput {
    More,
    Done,
    Cancelled,
}

fn edit_hidden(line: &mut String, key: KeyEvent) -> HiddenInput {
    if key.kind != KeyEventKind::Press {
        return HiddenInput::More;
    }
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            HiddenInput::Cancelled
        }
        KeyCode::Char(c) => {
            line.push(c);
            HiddenInput::More
        }
        KeyCode::Backspace => {
            line.pop();
            HiddenInput::More
        }
        KeyCode::Enter => HiddenInput::Done,
        KeyCode::Esc => HiddenInput::Cancelled,
        _ => HiddenInput::More,
    }
}

fn confirm(label: &str, default: bool) -> Result<bool> {
    let hint = if default { "Y/n" } else { "y/N" };
    let answer = prompt(&format!("{label} ({hint})"), Some(""))?;
    Ok(match answer.to_lowercase().as_str() {
        "" => default,
        a => a.starts_with('y'),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn hidden_input_collects_and_edits() {
        let mut line = String::new();
        for c in "pw!x".chars() {
            assert_eq!(edit_hidden(&mut line, press(KeyCode::Char(c))), HiddenInput::More);
        }
        edit_hidden(&mut line, press(KeyCode::Backspace));
        assert_eq!(edit_hidden(&mut line, press(KeyCode::Enter)), HiddenInput::Done);
        assert_eq!(line, "pw!");
    }

    #[test]
    fn hidden_input_can_be_cancelled() {
        let mut line = String::new();
        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(edit_hidden(&mut line, ctrl_c), HiddenInput::Cancelled);
        assert_eq!(edit_hidden(&mut line, press(KeyCode::Esc)), HiddenInput::Cancelled);
        assert!(line.is_empty());
    }

    #[test]
    fn key_releases_are_ignored() {
        let mut line = String::new();
        let mut release = press(KeyCode::Char('a'));
        release.kind = KeyEventKind::Release;
        assert_eq!(edit_hidden(&mut line, release), HiddenInput::More);
        assert!(line.is_empty());
    }
}
