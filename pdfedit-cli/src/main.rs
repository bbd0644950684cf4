use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use crossterm::style::Stylize;
use directories::ProjectDirs;
use pdfedit_client::{page_image_path, DecodedSurface, HttpEditService};
use pdfedit_core::{
    workspace_id_for_server, ClientConfig, ClientError, EditOutcome, EditSession, FileStateStore,
    NewText, NoticeLevel, RevisionId, SessionEvent, SessionSnapshot, StateStore, TextExtraction,
};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "pdfedit",
    version,
    about = "Edit the text of PDFs held by a pdfedit server"
)]
struct Args {
    /// Server base URL, overriding the config file
    #[arg(long, global = true)]
    server: Option<String>,

    /// Config file to read instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Upload a PDF and make it the current document
    Upload { file: PathBuf },
    /// Switch to a revision that already exists on the server
    Open { revision: String },
    /// Show the current document without contacting the server
    Status,
    /// Reload the current revision's page images
    Preview {
        /// Write page PNGs here instead of the configured preview directory
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Turn edit mode on or off
    EditMode {
        #[arg(value_enum)]
        mode: Toggle,
    },
    /// List selectable text blocks (turns edit mode on)
    Blocks {
        #[arg(short, long)]
        page: Option<u32>,
    },
    /// Show which block sits under a pixel position of a page image
    Pick {
        #[arg(long)]
        page: u32,
        #[arg(long)]
        x: f64,
        #[arg(long)]
        y: f64,
    },
    /// Replace the text of a block
    Edit {
        #[arg(long)]
        page: u32,
        #[arg(long)]
        block: usize,
        /// Send the edit without the block's original font
        #[arg(long)]
        no_preserve: bool,
        text: String,
    },
    /// Remove a block's text
    Delete {
        #[arg(long)]
        page: u32,
        #[arg(long)]
        block: usize,
    },
    /// Place new text at page coordinates
    AddText {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 100.0)]
        x: f64,
        #[arg(long, default_value_t = 100.0)]
        y: f64,
        #[arg(long = "size", default_value_t = 12.0)]
        font_size: f64,
        /// RGB components in 0..=1, e.g. 0,0,1
        #[arg(long, value_parser = parse_color)]
        color: Option<[f64; 3]>,
        text: String,
    },
    /// Print the document's text, falling back to OCR for scanned pages
    Extract {
        /// Go straight to the OCR endpoint
        #[arg(long)]
        ocr: bool,
    },
    /// Keep only a page range of the current document
    Split {
        #[arg(long)]
        start: u32,
        #[arg(long)]
        end: Option<u32>,
    },
    /// Append other server revisions to the current document
    Merge {
        #[arg(required = true)]
        others: Vec<String>,
    },
    /// Save the current revision locally
    Download {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Convert the current revision to a Word document and save it
    ToWord {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "pdfedit", "pdfedit")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| ClientConfig::default_path(&project_dirs));
    let mut config = ClientConfig::load(&config_path)?;
    if let Some(server) = &args.server {
        config.server_url = server.clone();
    }

    let store = FileStateStore::new(project_dirs.data_local_dir().join("state"))?;
    let workspace = workspace_id_for_server(&config.server_url);
    let snapshot = store.load(workspace)?.unwrap_or_default();

    if let Command::Status = args.command {
        print_status(&config, &snapshot);
        return Ok(ExitCode::SUCCESS);
    }

    let service = Arc::new(HttpEditService::new(&config)?);
    let mut surface = DecodedSurface::new(config.display_scale);
    let preview_dir = match &args.command {
        Command::Preview { out: Some(dir) } => Some(dir.clone()),
        _ => config.preview_dir.clone(),
    };
    if let Some(dir) = &preview_dir {
        surface = surface.with_output_dir(dir);
    }
    let mut session =
        EditSession::new(service, Arc::new(surface)).with_notice_ttl(config.notice_ttl);

    if let Err(err) = session.restore(snapshot).await {
        warn!(%err, "could not reload the saved document");
    }
    print_notices(&session);

    let outcome = run(args.command, &mut session, &config, preview_dir.as_deref()).await;
    print_notices(&session);
    store
        .save(workspace, &session.snapshot())
        .context("failed to save session state")?;

    match outcome {
        Ok(()) => Ok(ExitCode::SUCCESS),
        // Already shown as a notice.
        Err(err) if err.downcast_ref::<ClientError>().is_some() => Ok(ExitCode::FAILURE),
        Err(err) => Err(err),
    }
}

async fn run(
    command: Command,
    session: &mut EditSession,
    config: &ClientConfig,
    preview_dir: Option<&Path>,
) -> Result<()> {
    match command {
        Command::Status => {}
        Command::Upload { file } => {
            let revision = session.upload(&file).await?;
            println!("{revision}");
        }
        Command::Open { revision } => {
            session.open_revision(RevisionId::new(revision)).await?;
            print_pages(session, preview_dir);
        }
        Command::Preview { .. } => {
            session.reload().await?;
            print_pages(session, preview_dir);
        }
        Command::EditMode { mode: Toggle::On } => session.enable_edit_mode().await?,
        Command::EditMode { mode: Toggle::Off } => session.disable_edit_mode(),
        Command::Blocks { page } => {
            ensure_editing(session).await?;
            print_blocks(session, page);
        }
        Command::Pick { page, x, y } => {
            ensure_editing(session).await?;
            if !session.click(page, x, y) {
                return Err(anyhow!("no text block at ({x}, {y}) on page {page}"));
            }
            if let (Some(selection), Some(form)) = (session.selection(), session.form()) {
                println!(
                    "page {} block {}: {:?} ({})",
                    selection.page_num, selection.block_index, form.original_text, form.font
                );
            }
        }
        Command::Edit {
            page,
            block,
            no_preserve,
            text,
        } => {
            ensure_editing(session).await?;
            session.select_block(page, block)?;
            let preserve = config.preserve_formatting && !no_preserve;
            let outcome = session.confirm_edit(&text, preserve).await?;
            print_outcome(&outcome);
        }
        Command::Delete { page, block } => {
            ensure_editing(session).await?;
            session.select_block(page, block)?;
            let outcome = session.confirm_delete().await?;
            print_outcome(&outcome);
        }
        Command::AddText {
            page,
            x,
            y,
            font_size,
            color,
            text,
        } => {
            let revision = session
                .add_text(NewText {
                    page_num: page,
                    text,
                    x,
                    y,
                    font_size,
                    color,
                })
                .await?;
            println!("{revision}");
        }
        Command::Extract { ocr } => {
            let extraction = if ocr {
                session.ocr_text().await?
            } else {
                session.extract_text().await?
            };
            print_extraction(&extraction);
        }
        Command::Split { start, end } => {
            let revision = session.split(start, end).await?;
            println!("{revision}");
        }
        Command::Merge { others } => {
            let others: Vec<RevisionId> = others.into_iter().map(RevisionId::new).collect();
            let revision = session.merge(&others).await?;
            println!("{revision}");
        }
        Command::Download { output } => {
            let contents = session.download().await?;
            let path = match (output, session.revision()) {
                (Some(path), _) => path,
                (None, Some(revision)) => PathBuf::from(revision.as_str()),
                (None, None) => PathBuf::from("document.pdf"),
            };
            write_file(&path, &contents)?;
            println!("{}", path.display());
        }
        Command::ToWord { output } => {
            let document = session.convert_to_word().await?;
            let path =
                output.unwrap_or_else(|| PathBuf::from(&document.conversion.word_filename));
            write_file(&path, &document.contents)?;
            println!(
                "{} ({} pages, {} text blocks)",
                path.display(),
                document.conversion.pages_processed,
                document.conversion.text_blocks_processed
            );
        }
    }
    Ok(())
}

async fn ensure_editing(session: &mut EditSession) -> Result<()> {
    if session.revision().is_none() {
        return Err(anyhow!("no document loaded; upload or open one first"));
    }
    if !session.is_edit_mode() {
        session.enable_edit_mode().await?;
    }
    Ok(())
}

fn print_status(config: &ClientConfig, snapshot: &SessionSnapshot) {
    println!("Server: {}", config.server_url);
    match &snapshot.revision {
        Some(revision) => {
            println!("Document: {revision}");
            println!("Pages: {}", snapshot.page_count);
            println!(
                "Edit mode: {}",
                if snapshot.edit_mode { "on" } else { "off" }
            );
            if !snapshot.history.is_empty() {
                let history: Vec<&str> = snapshot.history.iter().map(RevisionId::as_str).collect();
                println!("History: {}", history.join(" -> "));
            }
        }
        None => println!("No document loaded"),
    }
}

fn print_pages(session: &EditSession, preview_dir: Option<&Path>) {
    let Some(revision) = session.revision() else {
        return;
    };
    for page in session.pages() {
        match (page.size, &page.error) {
            (Some(size), _) => {
                let mut line = format!(
                    "page {}: {:.0}x{:.0}",
                    page.page_num, size.width, size.height
                );
                if page.is_image_based {
                    line.push_str(" (scanned)");
                }
                if let Some(dir) = preview_dir {
                    let path = page_image_path(dir, revision, page.page_num);
                    line.push_str(&format!(" {}", path.display()));
                }
                println!("{line}");
            }
            (None, Some(error)) => println!("page {}: {}", page.page_num, error),
            (None, None) => println!("page {}: not loaded", page.page_num),
        }
    }
}

fn print_blocks(session: &EditSession, only_page: Option<u32>) {
    for overlay in session.overlays() {
        if only_page.is_some_and(|page| page != overlay.page_num) {
            continue;
        }
        let Some(page_blocks) = session.blocks().get(overlay.page_num as usize - 1) else {
            continue;
        };
        for region in &overlay.regions {
            let block = &page_blocks.blocks[region.block_index];
            println!(
                "{}:{}\t{}\t{:.0},{:.0} {:.0}x{:.0}\t{:?}",
                overlay.page_num,
                region.block_index,
                block.font_info().describe(),
                region.rect.x,
                region.rect.y,
                region.rect.width,
                region.rect.height,
                block.text
            );
        }
    }
}

fn print_outcome(outcome: &EditOutcome) {
    match outcome {
        EditOutcome::Unchanged => println!("unchanged"),
        EditOutcome::Revised(revision) => println!("{revision}"),
    }
}

fn print_extraction(extraction: &TextExtraction) {
    for page in &extraction.pages {
        println!("--- Page {} ---", page.page_num);
        println!("{}", page.text.trim_end());
    }
}

fn print_notices(session: &EditSession) {
    for event in session.take_events() {
        let SessionEvent::Notice(notice) = event else {
            continue;
        };
        let marker = match notice.level {
            NoticeLevel::Info => "ℹ".blue(),
            NoticeLevel::Success => "✓".green(),
            NoticeLevel::Warning => "!".yellow(),
            NoticeLevel::Error => "✗".red(),
        };
        eprintln!("{marker} {}", notice.message);
    }
}

fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents).with_context(|| format!("failed to write {:?}", path))?;
    info!(path = %path.display(), bytes = contents.len(), "file saved");
    Ok(())
}

fn parse_color(raw: &str) -> Result<[f64; 3], String> {
    let parts: Vec<f64> = raw
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|err| format!("invalid color component: {err}"))?;
    match parts.as_slice() {
        [r, g, b] if parts.iter().all(|c| (0.0..=1.0).contains(c)) => Ok([*r, *g, *b]),
        [_, _, _] => Err("color components must be between 0 and 1".to_owned()),
        _ => Err("expected three comma-separated components".to_owned()),
    }
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "pdfedit.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);
    // stdout carries command output
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_filter(LevelFilter::WARN);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rgb_triples() {
        assert_eq!(parse_color("0, 0.5 ,1").unwrap(), [0.0, 0.5, 1.0]);
        assert!(parse_color("0,0").is_err());
        assert!(parse_color("0,0,2").is_err());
        assert!(parse_color("red,0,0").is_err());
    }

    #[test]
    fn edit_takes_text_after_flags() {
        let args = Args::try_parse_from([
            "pdfedit", "edit", "--page", "2", "--block", "3", "--no-preserve", "Goodbye",
        ])
        .unwrap();
        match args.command {
            Command::Edit {
                page,
                block,
                no_preserve,
                text,
            } => {
                assert_eq!((page, block), (2, 3));
                assert!(no_preserve);
                assert_eq!(text, "Goodbye");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn global_server_flag_works_after_subcommand() {
        let args =
            Args::try_parse_from(["pdfedit", "status", "--server", "http://10.0.0.2:5000"])
                .unwrap();
        assert_eq!(args.server.as_deref(), Some("http://10.0.0.2:5000"));
    }
}
