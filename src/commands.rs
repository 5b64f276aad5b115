//! `hj` command implementations.
//!
//! Each `run_*` function drives one [`Archive`] operation and prints its
//! result to stdout, either as human-readable text or, with `--json`, as
//! pretty-printed JSON. Logs go to stderr so both forms stay pipeable.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use uuid::Uuid;

use helsejournal_core::metadata::RawMetadata;
use helsejournal_core::models::{Document, ListFilter, Note, ShareLink};
use helsejournal_core::search::SearchFilters;
use helsejournal_core::share::ShareOptions;
use helsejournal_core::tree::TreeNode;

use crate::archive::Archive;

/// Output settings shared by every command.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub json: bool,
}

impl Output {
    fn emit<T: Serialize>(&self, value: &T, human: impl FnOnce()) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            human();
        }
        Ok(())
    }
}

pub fn parse_id(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s.trim()).with_context(|| format!("invalid id: {}", s))
}

// ============ Documents ============

pub async fn run_upload(
    archive: &Archive,
    owner: &str,
    path: &Path,
    metadata: &RawMetadata,
    out: Output,
) -> Result<()> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let doc = archive.upload(owner, bytes, &filename, metadata).await?;
    archive.wait_for_extractions().await;
    let doc = archive.get_document(owner, doc.id).await?;

    out.emit(&doc, || {
        println!("Uploaded {}", doc.id);
        print_document_summary(&doc);
    })
}

pub async fn run_list(
    archive: &Archive,
    owner: &str,
    filter: &ListFilter,
    out: Output,
) -> Result<()> {
    let docs = archive.list_documents(owner, filter).await?;
    out.emit(&docs, || {
        if docs.is_empty() {
            println!("No documents.");
            return;
        }
        for doc in &docs {
            let mut flags = String::new();
            if doc.favorite {
                flags.push('*');
            }
            if doc.archived {
                flags.push('A');
            }
            if !doc.processed {
                flags.push('?');
            }
            println!(
                "{}  {:>4}  {:<3} {}",
                doc.id,
                doc.year.map(|y| y.to_string()).unwrap_or_else(|| "-".into()),
                flags,
                doc.display_title()
            );
        }
        println!();
        println!("{} document(s)", docs.len());
    })
}

pub async fn run_get(archive: &Archive, owner: &str, id: Uuid, out: Output) -> Result<()> {
    let doc = archive.get_document(owner, id).await?;
    out.emit(&doc, || {
        println!("--- Document ---");
        println!("id: {}", doc.id);
        print_document_summary(&doc);
        println!("fingerprint: {}", doc.fingerprint);
        println!("created: {}", doc.created_at.to_rfc3339());
        println!("updated: {}", doc.updated_at.to_rfc3339());
        if let Some(desc) = &doc.description {
            println!("description: {}", desc);
        }
        println!("--- Text ---");
        if doc.text().is_empty() {
            println!("(no text extracted)");
        } else {
            println!("{}", doc.text());
        }
    })
}

/// Writes the owner's stored copy of a document to `dest`.
pub async fn run_download(archive: &Archive, owner: &str, id: Uuid, dest: &Path) -> Result<()> {
    let (doc, bytes) = archive.open_file(owner, id).await?;
    tokio::fs::write(dest, &bytes)
        .await
        .with_context(|| format!("Failed to write {}", dest.display()))?;
    println!(
        "Wrote {} ({} bytes) to {}",
        doc.original_filename,
        bytes.len(),
        dest.display()
    );
    Ok(())
}

pub async fn run_update(
    archive: &Archive,
    owner: &str,
    id: Uuid,
    patch: &RawMetadata,
    out: Output,
) -> Result<()> {
    let doc = archive.update_metadata(owner, id, patch).await?;
    out.emit(&doc, || {
        println!("Updated {}", doc.id);
        print_document_summary(&doc);
    })
}

pub async fn run_delete(archive: &Archive, owner: &str, id: Uuid) -> Result<()> {
    archive.delete_document(owner, id).await?;
    println!("Deleted {}", id);
    Ok(())
}

pub async fn run_favorite(archive: &Archive, owner: &str, id: Uuid, out: Output) -> Result<()> {
    let doc = archive.toggle_favorite(owner, id).await?;
    out.emit(&doc, || {
        let state = if doc.favorite { "marked" } else { "unmarked" };
        println!("{} {} as favorite", doc.id, state);
    })
}

pub async fn run_archive(
    archive: &Archive,
    owner: &str,
    id: Uuid,
    archived: bool,
    out: Output,
) -> Result<()> {
    let doc = archive.set_archived(owner, id, archived).await?;
    out.emit(&doc, || {
        let state = if doc.archived { "archived" } else { "restored" };
        println!("{} {}", doc.id, state);
    })
}

fn print_document_summary(doc: &Document) {
    println!("title: {}", doc.display_title());
    println!("file: {} ({} bytes)", doc.original_filename, doc.size_bytes);
    if let Some(year) = doc.year {
        println!("year: {}", year);
    }
    if let Some(provider) = &doc.provider {
        println!("provider: {}", provider);
    }
    if let Some(clinician) = &doc.clinician {
        println!("clinician: {}", clinician);
    }
    if let Some(date) = doc.document_date {
        println!("date: {}", date.format("%Y-%m-%d"));
    }
    if let Some(category) = &doc.category {
        println!("category: {}", category);
    }
    println!(
        "processed: {}  favorite: {}  archived: {}",
        doc.processed, doc.favorite, doc.archived
    );
}

// ============ Browse & search ============

pub async fn run_tree(archive: &Archive, owner: &str, out: Output) -> Result<()> {
    let tree = archive.tree(owner).await?;
    out.emit(&tree, || {
        if tree.is_empty() {
            println!("No documents.");
        }
        for node in &tree {
            print_node(node, 0);
        }
    })
}

fn print_node(node: &TreeNode, depth: usize) {
    match node.document_id {
        Some(id) => println!("{}{}  [{}]", "  ".repeat(depth), node.name, id),
        None => println!("{}{}/", "  ".repeat(depth), node.name),
    }
    for child in &node.children {
        print_node(child, depth + 1);
    }
}

pub async fn run_search(
    archive: &Archive,
    owner: &str,
    query: &str,
    filters: SearchFilters,
    limit: Option<usize>,
    out: Output,
) -> Result<()> {
    let results = archive.search(owner, query, filters, limit).await?;
    out.emit(&results, || {
        if results.is_empty() {
            println!("No results.");
            return;
        }
        for (i, result) in results.iter().enumerate() {
            println!("{}. [{:.2}] {}", i + 1, result.score, result.title);
            if let Some(provider) = &result.provider {
                println!("    provider: {}", provider);
            }
            if let Some(year) = result.year {
                println!("    year: {}", year);
            }
            if let Some(h) = &result.highlight {
                println!("    > {}", h.render().replace('\n', " "));
            }
            println!("    id: {}", result.document_id);
            println!();
        }
    })
}

// ============ Pages ============

pub async fn run_page(
    archive: &Archive,
    owner: &str,
    id: Uuid,
    page: usize,
    out: Output,
) -> Result<()> {
    let text = archive.extract_page(owner, id, page).await?;
    #[derive(Serialize)]
    struct PageText<'a> {
        page: usize,
        text: &'a str,
    }
    out.emit(&PageText { page, text: &text }, || {
        if text.is_empty() {
            println!("(page {} has no text)", page);
        } else {
            println!("{}", text);
        }
    })
}

pub async fn run_hits(
    archive: &Archive,
    owner: &str,
    id: Uuid,
    query: &str,
    out: Output,
) -> Result<()> {
    let hits = archive.page_hits(owner, id, query).await?;
    out.emit(&hits, || {
        if hits.is_empty() {
            println!("No results.");
        }
        for hit in &hits {
            println!("page {}: {}", hit.page, hit.highlight.render().replace('\n', " "));
        }
    })
}

pub async fn run_info(archive: &Archive, owner: &str, id: Uuid, out: Output) -> Result<()> {
    let info = archive.inspect(owner, id).await?;
    out.emit(&info, || {
        println!("pages: {}", info.page_count);
        println!("text layer: {}", info.has_text_layer);
        println!("encrypted: {}", info.encrypted);
        for (label, value) in [
            ("title", &info.title),
            ("author", &info.author),
            ("producer", &info.producer),
        ] {
            if let Some(v) = value {
                println!("{}: {}", label, v);
            }
        }
    })
}

pub async fn run_reprocess(archive: &Archive, owner: &str, id: Uuid, out: Output) -> Result<()> {
    let doc = archive.reprocess(owner, id).await?;
    out.emit(&doc, || {
        println!(
            "Reprocessed {}: processed={} ({} chars)",
            doc.id,
            doc.processed,
            doc.text().chars().count()
        );
    })
}

// ============ Notes ============

pub async fn run_note_add(
    archive: &Archive,
    owner: &str,
    id: Uuid,
    content: &str,
    page: Option<u32>,
    out: Output,
) -> Result<()> {
    let note = archive.add_note(owner, id, content, page).await?;
    out.emit(&note, || println!("Added note {}", note.id))
}

pub async fn run_note_list(archive: &Archive, owner: &str, id: Uuid, out: Output) -> Result<()> {
    let notes = archive.list_notes(owner, id).await?;
    out.emit(&notes, || {
        if notes.is_empty() {
            println!("No notes.");
        }
        for note in &notes {
            print_note(note);
        }
    })
}

fn print_note(note: &Note) {
    let page = note
        .page_number
        .map(|p| format!(" (page {})", p))
        .unwrap_or_default();
    println!(
        "{}  {}{}",
        note.id,
        note.created_at.format("%Y-%m-%d %H:%M"),
        page
    );
    println!("    {}", note.content);
}

pub async fn run_note_rm(archive: &Archive, owner: &str, note_id: Uuid) -> Result<()> {
    archive.delete_note(owner, note_id).await?;
    println!("Deleted note {}", note_id);
    Ok(())
}

// ============ Share links ============

pub async fn run_share_create(
    archive: &Archive,
    owner: &str,
    id: Uuid,
    options: ShareOptions,
    out: Output,
) -> Result<()> {
    let issued = archive.issue_share(owner, id, options).await?;
    out.emit(&issued, || {
        println!("{}", issued.url);
        print_link(&issued.link);
    })
}

pub async fn run_share_list(archive: &Archive, owner: &str, id: Uuid, out: Output) -> Result<()> {
    let links = archive.list_shares(owner, id).await?;
    out.emit(&links, || {
        if links.is_empty() {
            println!("No share links.");
        }
        for link in &links {
            print_link(link);
        }
    })
}

pub async fn run_share_revoke(
    archive: &Archive,
    owner: &str,
    link_id: Uuid,
    out: Output,
) -> Result<()> {
    let link = archive.revoke_share(owner, link_id).await?;
    out.emit(&link, || println!("Revoked share link {}", link.id))
}

/// Resolves a token like an anonymous visitor would and writes the file to
/// `dest`. Counts as one view.
pub async fn run_share_open(archive: &Archive, token: &str, dest: &Path) -> Result<()> {
    let file = archive.resolve_share(token).await?;
    tokio::fs::write(dest, &file.bytes)
        .await
        .with_context(|| format!("Failed to write {}", dest.display()))?;
    println!(
        "Wrote {} ({} bytes) to {}",
        file.filename,
        file.bytes.len(),
        dest.display()
    );
    Ok(())
}

fn print_link(link: &ShareLink) {
    let expires = link
        .expires_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "never".into());
    let views = match link.max_views {
        Some(max) => format!("{}/{}", link.view_count, max),
        None => link.view_count.to_string(),
    };
    println!(
        "{}  {:<9} views {:<7} expires {}",
        link.id,
        link.state.as_str(),
        views,
        expires
    );
}
