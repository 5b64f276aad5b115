//! # hj: personal medical document archive
//!
//! Command-line interface for the archive. Stores PDF records, extracts
//! their text (OCR for scans), and hands out expiring share links.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `hj init` | Create the database schema |
//! | `hj upload <file>` | Store a PDF with optional metadata |
//! | `hj list` | List documents, newest first |
//! | `hj get <id>` | Show a document and its text |
//! | `hj update <id>` | Edit metadata |
//! | `hj delete <id>` | Remove a document with its notes and links |
//! | `hj favorite <id>` | Toggle the favorite flag |
//! | `hj archive <id>` | Hide a document from browse and search |
//! | `hj tree` | Year → provider → document view |
//! | `hj search <query>` | Substring search with highlights |
//! | `hj page <id> <n>` | Extract the text of one page |
//! | `hj hits <id> <query>` | Pages of a document containing a query |
//! | `hj info <id>` | PDF structure facts |
//! | `hj reprocess <id>` | Run extraction again |
//! | `hj note add\|list\|rm` | Annotations |
//! | `hj share create\|list\|revoke\|open` | Share links |
//! | `hj serve` | Serve share links over HTTP |
//!
//! ## Configuration
//!
//! All commands accept `--config <path>` (default `./config/hj.toml`) and
//! `--owner <id>` (default `[archive].owner`). Logging is controlled with
//! `RUST_LOG`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use helsejournal::archive::Archive;
use helsejournal::commands::{self, Output};
use helsejournal::{config, migrate, server};
use helsejournal_core::metadata::RawMetadata;
use helsejournal_core::models::ListFilter;
use helsejournal_core::search::SearchFilters;
use helsejournal_core::share::ShareOptions;

#[derive(Parser)]
#[command(
    name = "hj",
    about = "Personal medical document archive",
    version,
    long_about = "Stores medical PDFs, extracts their text (native or OCR), \
                   organises them by year and provider, searches them and \
                   shares single documents through expiring links."
)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./config/hj.toml")]
    config: PathBuf,

    /// Owner id to act as (overrides `[archive].owner`)
    #[arg(long, global = true)]
    owner: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Metadata flags shared by `upload` and `update`.
#[derive(clap::Args, Debug, Default)]
struct MetadataArgs {
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    description: Option<String>,
    /// Year, e.g. 2021; unparseable values are ignored
    #[arg(long)]
    year: Option<String>,
    /// Hospital, clinic or GP office
    #[arg(long)]
    provider: Option<String>,
    #[arg(long)]
    clinician: Option<String>,
    /// Date of the document (YYYY-MM-DD or RFC 3339)
    #[arg(long)]
    date: Option<String>,
    #[arg(long)]
    category: Option<String>,
}

impl MetadataArgs {
    fn into_raw(self) -> RawMetadata {
        RawMetadata {
            title: self.title,
            description: self.description,
            year: self.year,
            provider: self.provider,
            clinician: self.clinician,
            document_date: self.date,
            category: self.category,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite file and tables. Safe to run repeatedly.
    Init,

    /// Store a PDF.
    ///
    /// The file is rejected if it is not a PDF, exceeds
    /// `[storage].max_upload_bytes`, or is byte-identical to one already
    /// stored for this owner. Text is extracted right away unless
    /// `[extraction].mode = "deferred"`.
    Upload {
        /// Path to the PDF file.
        file: PathBuf,
        #[command(flatten)]
        metadata: MetadataArgs,
    },

    /// List documents, newest first.
    List {
        #[arg(long)]
        year: Option<i32>,
        /// Case-insensitive provider substring
        #[arg(long)]
        provider: Option<String>,
        /// Only favorites
        #[arg(long)]
        favorite: bool,
        /// Include archived documents
        #[arg(long)]
        archived: bool,
        #[arg(long, default_value = "0")]
        offset: usize,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show a document with its extracted text.
    Get {
        id: String,
        /// Also write the stored PDF to this path
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Edit metadata. Omitted fields are kept; blank values clear them.
    Update {
        id: String,
        #[command(flatten)]
        metadata: MetadataArgs,
    },

    /// Delete a document, its notes, its share links and the stored file.
    Delete { id: String },

    /// Toggle the favorite flag.
    Favorite { id: String },

    /// Archive a document (hidden from tree and search).
    Archive {
        id: String,
        /// Restore an archived document instead
        #[arg(long)]
        undo: bool,
    },

    /// Browse documents grouped by year and provider.
    Tree,

    /// Search titles, descriptions, providers, clinicians and extracted text.
    Search {
        query: String,
        #[arg(long)]
        year: Option<i32>,
        #[arg(long)]
        provider: Option<String>,
        /// Maximum results (capped by `[search].max_results`)
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Extract the text of a single page (1-based), using OCR if needed.
    Page { id: String, page: usize },

    /// Show the pages of a document that contain a query.
    Hits { id: String, query: String },

    /// Show page count, text layer and document-info fields of the PDF.
    Info { id: String },

    /// Run text extraction again.
    Reprocess { id: String },

    /// Manage notes attached to a document.
    Note {
        #[command(subcommand)]
        action: NoteAction,
    },

    /// Manage share links.
    Share {
        #[command(subcommand)]
        action: ShareAction,
    },

    /// Start the HTTP server for share links.
    ///
    /// Binds to `[server].bind` and serves `GET /share/{token}`.
    Serve,
}

#[derive(Subcommand)]
enum NoteAction {
    /// Attach a note to a document.
    Add {
        id: String,
        content: String,
        /// Page the note refers to (1-based)
        #[arg(long)]
        page: Option<u32>,
    },
    /// List a document's notes, newest first.
    List { id: String },
    /// Delete a note.
    Rm { note_id: String },
}

#[derive(Subcommand)]
enum ShareAction {
    /// Issue a share link for a document.
    Create {
        id: String,
        /// Days until the link expires (default `[share].default_ttl_days`)
        #[arg(long, conflicts_with = "no_expiry")]
        ttl_days: Option<i64>,
        /// Issue a link without an expiry
        #[arg(long)]
        no_expiry: bool,
        /// Number of views before the link is used up
        #[arg(long)]
        max_views: Option<u32>,
    },
    /// List a document's share links.
    List { id: String },
    /// Revoke a share link.
    Revoke { link_id: String },
    /// Open a link by token, as an anonymous recipient would (counts a view).
    Open {
        token: String,
        /// Where to write the PDF
        #[arg(long)]
        out: PathBuf,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("helsejournal=info,hj=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;
    let out = Output { json: cli.json };

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
            return Ok(());
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
            return Ok(());
        }
        _ => {}
    }

    let owner = cli.owner.unwrap_or_else(|| cfg.archive.owner.clone());
    let archive = Archive::open(&cfg).await?;
    let a = &archive;
    let owner = owner.as_str();

    match cli.command {
        Commands::Init | Commands::Serve => {
            // Handled above (before opening the archive)
            unreachable!()
        }
        Commands::Upload { file, metadata } => {
            commands::run_upload(a, owner, &file, &metadata.into_raw(), out).await?;
        }
        Commands::List {
            year,
            provider,
            favorite,
            archived,
            offset,
            limit,
        } => {
            let filter = ListFilter {
                year,
                provider,
                favorite: favorite.then_some(true),
                include_archived: archived,
                offset,
                limit,
            };
            commands::run_list(a, owner, &filter, out).await?;
        }
        Commands::Get { id, out: dest } => {
            let id = commands::parse_id(&id)?;
            commands::run_get(a, owner, id, out).await?;
            if let Some(dest) = dest {
                commands::run_download(a, owner, id, &dest).await?;
            }
        }
        Commands::Update { id, metadata } => {
            let id = commands::parse_id(&id)?;
            commands::run_update(a, owner, id, &metadata.into_raw(), out).await?;
        }
        Commands::Delete { id } => {
            commands::run_delete(a, owner, commands::parse_id(&id)?).await?;
        }
        Commands::Favorite { id } => {
            commands::run_favorite(a, owner, commands::parse_id(&id)?, out).await?;
        }
        Commands::Archive { id, undo } => {
            commands::run_archive(a, owner, commands::parse_id(&id)?, !undo, out).await?;
        }
        Commands::Tree => {
            commands::run_tree(a, owner, out).await?;
        }
        Commands::Search {
            query,
            year,
            provider,
            limit,
        } => {
            let filters = SearchFilters { year, provider };
            commands::run_search(a, owner, &query, filters, limit, out).await?;
        }
        Commands::Page { id, page } => {
            commands::run_page(a, owner, commands::parse_id(&id)?, page, out).await?;
        }
        Commands::Hits { id, query } => {
            commands::run_hits(a, owner, commands::parse_id(&id)?, &query, out).await?;
        }
        Commands::Info { id } => {
            commands::run_info(a, owner, commands::parse_id(&id)?, out).await?;
        }
        Commands::Reprocess { id } => {
            commands::run_reprocess(a, owner, commands::parse_id(&id)?, out).await?;
        }
        Commands::Note { action } => match action {
            NoteAction::Add { id, content, page } => {
                let id = commands::parse_id(&id)?;
                commands::run_note_add(a, owner, id, &content, page, out).await?;
            }
            NoteAction::List { id } => {
                commands::run_note_list(a, owner, commands::parse_id(&id)?, out).await?;
            }
            NoteAction::Rm { note_id } => {
                commands::run_note_rm(a, owner, commands::parse_id(&note_id)?).await?;
            }
        },
        Commands::Share { action } => match action {
            ShareAction::Create {
                id,
                ttl_days,
                no_expiry,
                max_views,
            } => {
                let ttl_days = if no_expiry {
                    None
                } else {
                    Some(ttl_days.unwrap_or(cfg.share.default_ttl_days))
                };
                let options = ShareOptions {
                    ttl_days,
                    max_views,
                };
                let id = commands::parse_id(&id)?;
                commands::run_share_create(a, owner, id, options, out).await?;
            }
            ShareAction::List { id } => {
                commands::run_share_list(a, owner, commands::parse_id(&id)?, out).await?;
            }
            ShareAction::Revoke { link_id } => {
                let link_id = commands::parse_id(&link_id)?;
                commands::run_share_revoke(a, owner, link_id, out).await?;
            }
            ShareAction::Open { token, out: dest } => {
                commands::run_share_open(a, &token, &dest).await?;
            }
        },
    }

    archive.wait_for_extractions().await;
    Ok(())
}
