//! Command-line front end for the document engine.
//!
//! # Responsibility
//! - Inspect, validate and re-save XML documents.
//! - Drive the HTML, plain-text and print exporters against files on disk.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;
use notetree_core::export::html::{INDEX_NAME, STYLESHEET_NAME};
use notetree_core::{
    deserialize, init_logging, serialize_tree, CancelToken, DocumentSession, DocumentTree,
    EngineConfig, ExportReport, ExportScope, LogLevel, NodeId,
};
use std::fs;
use std::path::{Path, PathBuf};

/// NoteTree document tool
#[derive(Parser, Debug)]
#[command(name = "notetree")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Engine config as JSON
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Absolute directory for log files; logging stays off without it
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); debug builds default to debug
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the node outline and document statistics
    Info {
        input: PathBuf,
    },

    /// Parse a document and report the first problem found
    Validate {
        input: PathBuf,
    },

    /// Parse and re-serialize a document in canonical form
    Roundtrip {
        input: PathBuf,

        /// Output file; defaults to stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Export a document
    Export {
        #[command(subcommand)]
        format: ExportFormat,
    },
}

#[derive(Subcommand, Debug)]
enum ExportFormat {
    /// One HTML page per node plus index and stylesheet
    Html {
        #[command(flatten)]
        source: ExportSource,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Plain text
    Text {
        #[command(flatten)]
        source: ExportSource,

        /// Single output file; defaults to stdout
        #[arg(short, long, conflicts_with = "per_node")]
        output: Option<PathBuf>,

        /// Write one `.txt` per node into this directory
        #[arg(long)]
        per_node: Option<PathBuf>,
    },

    /// Pango-style print markup
    Print {
        #[command(flatten)]
        source: ExportSource,

        /// Output file; defaults to stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct ExportSource {
    input: PathBuf,

    /// Limit the export to the subtree rooted at this node id
    #[arg(long, conflicts_with = "node")]
    subtree: Option<u64>,

    /// Limit the export to this single node
    #[arg(long)]
    node: Option<u64>,
}

impl ExportSource {
    fn scope(&self) -> ExportScope {
        match (self.subtree, self.node) {
            (Some(root), _) => ExportScope::Subtree(NodeId(root)),
            (None, Some(id)) => ExportScope::Node {
                id: NodeId(id),
                range: None,
            },
            (None, None) => ExportScope::All,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Some(directory) = &cli.log_dir {
        let level = cli
            .log_level
            .clone()
            .unwrap_or_else(|| LogLevel::for_build().as_str().to_string());
        init_logging(&level, directory).context("failed to start logging")?;
    }
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Info { input } => info_command(&input),
        Command::Validate { input } => {
            read_tree(&input)?;
            println!("{}: ok", input.display());
            Ok(())
        }
        Command::Roundtrip { input, output } => {
            let tree = read_tree(&input)?;
            let bytes = serialize_tree(&tree).context("serialization failed")?;
            write_or_print(output.as_deref(), &bytes)
        }
        Command::Export { format } => export_command(format, config),
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let json = fs::read_to_string(path)
        .with_context(|| format!("cannot read config {}", path.display()))?;
    EngineConfig::from_json_str(&json)
        .with_context(|| format!("invalid config {}", path.display()))
}

fn read_tree(input: &Path) -> Result<DocumentTree> {
    let bytes = fs::read(input).with_context(|| format!("cannot read {}", input.display()))?;
    deserialize(&bytes).with_context(|| format!("cannot parse {}", input.display()))
}

fn info_command(input: &Path) -> Result<()> {
    let tree = read_tree(input)?;
    println!("nodes: {}", tree.len());
    println!("next id: {}", tree.next_id());
    let bookmarks: Vec<String> = tree.bookmarks().iter().map(ToString::to_string).collect();
    println!("bookmarks: [{}]", bookmarks.join(", "));
    for id in tree.iter_all() {
        let node = tree.node(id)?;
        let depth = tree.depth(id)?;
        println!(
            "{}{} [{}] {} ({} chars, {} objects)",
            "  ".repeat(depth),
            id,
            node.syntax().as_str(),
            node.name,
            node.buffer.len(),
            node.buffer.embedded().len()
        );
    }
    Ok(())
}

fn export_command(format: ExportFormat, config: EngineConfig) -> Result<()> {
    let cancel = CancelToken::new();
    match format {
        ExportFormat::Html { source, output } => {
            let session = open_session(&source.input, config)?;
            let export = session.export_html(&source.scope(), &cancel)?;
            fs::create_dir_all(&output)
                .with_context(|| format!("cannot create {}", output.display()))?;
            for page in &export.pages {
                write_file(&output.join(&page.filename), page.html.as_bytes())?;
            }
            if let Some(index) = &export.index {
                write_file(&output.join(INDEX_NAME), index.as_bytes())?;
            }
            write_file(&output.join(STYLESHEET_NAME), export.stylesheet.as_bytes())?;
            for image in &export.images {
                write_file(&output.join(&image.path), &image.png)?;
            }
            info!(
                "event=cli_export module=cli status=ok format=html pages={} images={}",
                export.pages.len(),
                export.images.len()
            );
            print_report(&export.report)
        }
        ExportFormat::Text {
            source,
            output,
            per_node,
        } => {
            let session = open_session(&source.input, config)?;
            let export = session.export_plain_text(&source.scope(), &cancel)?;
            match per_node {
                Some(directory) => {
                    fs::create_dir_all(&directory)
                        .with_context(|| format!("cannot create {}", directory.display()))?;
                    for document in &export.documents {
                        write_file(&directory.join(&document.filename), document.text.as_bytes())?;
                    }
                }
                None => write_or_print(output.as_deref(), export.combined().as_bytes())?,
            }
            print_report(&export.report)
        }
        ExportFormat::Print { source, output } => {
            let session = open_session(&source.input, config)?;
            let export = session.export_print(&source.scope(), &cancel)?;
            write_or_print(output.as_deref(), export.markup.as_bytes())?;
            eprintln!("{} embedded objects need rendering", export.objects.len());
            print_report(&export.report)
        }
    }
}

fn open_session(input: &Path, config: EngineConfig) -> Result<DocumentSession> {
    let bytes = fs::read(input).with_context(|| format!("cannot read {}", input.display()))?;
    DocumentSession::open(&bytes, config)
        .with_context(|| format!("cannot open {}", input.display()))
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("cannot create {}", parent.display()))?;
    }
    fs::write(path, bytes).with_context(|| format!("cannot write {}", path.display()))
}

fn write_or_print(output: Option<&Path>, bytes: &[u8]) -> Result<()> {
    match output {
        Some(path) => write_file(path, bytes),
        None => {
            print!("{}", String::from_utf8_lossy(bytes));
            Ok(())
        }
    }
}

fn print_report(report: &ExportReport) -> Result<()> {
    for dangling in &report.dangling {
        eprintln!("warning: {dangling}");
    }
    for failure in &report.failures {
        eprintln!("error: node {} failed to export: {}", failure.node, failure.error);
    }
    if !report.failures.is_empty() {
        bail!("{} node(s) failed to export", report.failures.len());
    }
    Ok(())
}
