//! End-to-end flows through the public `Archive` API on the SQLite store,
//! with a scripted OCR engine standing in for pdftoppm and tesseract.

use async_trait::async_trait;
use helsejournal::archive::Archive;
use helsejournal::config::Config;
use helsejournal::extract::{
    ExtractError, ExtractOptions, Extractor, OcrEngine, PdfTextLayer, Rasterizer,
};
use helsejournal::sqlite_store::SqliteStore;
use helsejournal::{db, migrate};
use helsejournal_core::metadata::RawMetadata;
use helsejournal_core::models::ShareState;
use helsejournal_core::search::SearchFilters;
use helsejournal_core::share::ShareOptions;
use helsejournal_core::ArchiveError;
use lopdf::dictionary;
use lopdf::{Document, Object, Stream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

// ─── Helpers ────────────────────────────────────────────────────────

/// "Renders" a page by writing its number to the image file.
struct PageNumberRasterizer {
    calls: AtomicUsize,
}

#[async_trait]
impl Rasterizer for PageNumberRasterizer {
    async fn rasterize(
        &self,
        _pdf: &Path,
        page: usize,
        _dpi: u32,
        out_dir: &Path,
    ) -> Result<PathBuf, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let image = out_dir.join(format!("page-{}.png", page));
        tokio::fs::write(&image, page.to_string()).await?;
        Ok(image)
    }
}

/// Reads the page number back and returns fixed text for it.
struct ScriptedOcr;

#[async_trait]
impl OcrEngine for ScriptedOcr {
    async fn recognize(&self, image: &Path, _languages: &str) -> Result<String, ExtractError> {
        let page = tokio::fs::read_to_string(image).await?;
        Ok(format!("Side {} av journalnotat. Hjertefrekvens regelmessig.", page.trim()))
    }
}

fn build_pdf(pages: &[Option<&str>]) -> Vec<u8> {
    let mut doc = Document::with_version("1.4");
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let content = match text {
            Some(t) => format!("BT /F1 12 Tf 72 700 Td ({t}) Tj ET"),
            None => String::new(),
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => font_id },
            },
        });
        kids.push(page_id.into());
    }
    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}

fn test_config(tmp: &TempDir) -> Config {
    let root = tmp.path();
    let config_content = format!(
        r#"
[db]
path = "{}/hj.sqlite"

[storage]
root = "{}/files"

[extraction]
max_parallel_pages = 3
"#,
        root.display(),
        root.display()
    );
    toml::from_str(&config_content).unwrap()
}

async fn open_archive(tmp: &TempDir) -> (Archive, Arc<PageNumberRasterizer>) {
    let cfg = test_config(tmp);
    let pool = db::connect(&cfg).await.unwrap();
    migrate::apply(&pool).await.unwrap();

    let rasterizer = Arc::new(PageNumberRasterizer {
        calls: AtomicUsize::new(0),
    });
    let extractor = Extractor::new(
        Arc::new(PdfTextLayer),
        rasterizer.clone(),
        Arc::new(ScriptedOcr),
        ExtractOptions {
            dpi: 150,
            languages: "nor".into(),
            page_timeout: Duration::from_secs(5),
            max_parallel_pages: 3,
        },
    );
    let archive = Archive::new(cfg, Arc::new(SqliteStore::new(pool)), extractor).unwrap();
    (archive, rasterizer)
}

fn meta(year: &str, provider: &str) -> RawMetadata {
    RawMetadata {
        year: Some(year.into()),
        provider: Some(provider.into()),
        ..Default::default()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

/// A ten-page scan has no text layer, so every page goes through OCR and
/// the result lands in page order.
#[tokio::test]
async fn test_scanned_document_is_ocred_and_searchable() {
    let tmp = TempDir::new().unwrap();
    let (archive, rasterizer) = open_archive(&tmp).await;

    let doc = archive
        .upload("kari", build_pdf(&[None; 10]), "skann.pdf", &meta("2019", "Haukeland"))
        .await
        .unwrap();

    assert!(doc.processed);
    assert_eq!(rasterizer.calls.load(Ordering::SeqCst), 10);
    let text = doc.text();
    let first = text.find("Side 1 ").unwrap();
    let tenth = text.find("Side 10 ").unwrap();
    assert!(first < tenth);

    let results = archive
        .search("kari", "hjertefrekvens", SearchFilters::default(), None)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].document_id, doc.id);
    let highlight = results[0].highlight.as_ref().unwrap();
    assert_eq!(highlight.matched(), "Hjertefrekvens");

    let hits = archive.page_hits("kari", doc.id, "side 7 ").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].page, 7);

    let page = archive.extract_page("kari", doc.id, 4).await.unwrap();
    assert!(page.starts_with("Side 4 "));
}

/// Native text wins over OCR when present.
#[tokio::test]
async fn test_native_text_skips_ocr() {
    let tmp = TempDir::new().unwrap();
    let (archive, rasterizer) = open_archive(&tmp).await;

    let doc = archive
        .upload(
            "kari",
            build_pdf(&[Some("Poliklinisk notat")]),
            "notat.pdf",
            &RawMetadata::default(),
        )
        .await
        .unwrap();

    assert!(doc.processed);
    assert!(doc.text().contains("Poliklinisk"));
    assert_eq!(rasterizer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_dedup_is_per_owner_and_survives_archiving() {
    let tmp = TempDir::new().unwrap();
    let (archive, _) = open_archive(&tmp).await;
    let bytes = build_pdf(&[Some("Henvisning")]);

    let doc = archive
        .upload("kari", bytes.clone(), "a.pdf", &RawMetadata::default())
        .await
        .unwrap();
    archive.set_archived("kari", doc.id, true).await.unwrap();

    let err = archive
        .upload("kari", bytes.clone(), "b.pdf", &RawMetadata::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ArchiveError::Duplicate { .. }));

    archive
        .upload("ola", bytes, "a.pdf", &RawMetadata::default())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_tree_orders_years_and_unknowns() {
    let tmp = TempDir::new().unwrap();
    let (archive, _) = open_archive(&tmp).await;

    for (i, (year, provider)) in [("2018", "St. Olavs"), ("2022", "Ahus"), ("", "Ahus"), ("2022", "")]
        .iter()
        .enumerate()
    {
        let text = format!("Dokument nummer {}", i);
        archive
            .upload("kari", build_pdf(&[Some(&text)]), "d.pdf", &meta(year, provider))
            .await
            .unwrap();
    }

    let tree = archive.tree("kari").await.unwrap();
    let years: Vec<&str> = tree.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(years, vec!["2022", "2018", "Unknown Year"]);
    let providers_2022: Vec<&str> = tree[0].children.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(providers_2022, vec!["Ahus", "Unknown Provider"]);
}

/// Twenty concurrent visitors against a three-view link: exactly three get
/// the file and the stored counter stops at three.
#[tokio::test]
async fn test_concurrent_share_resolution_respects_bound() {
    let tmp = TempDir::new().unwrap();
    let (archive, _) = open_archive(&tmp).await;
    let archive = Arc::new(archive);

    let doc = archive
        .upload("kari", build_pdf(&[Some("Røntgen thorax")]), "rtg.pdf", &RawMetadata::default())
        .await
        .unwrap();
    let issued = archive
        .issue_share(
            "kari",
            doc.id,
            ShareOptions {
                ttl_days: Some(1),
                max_views: Some(3),
            },
        )
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for _ in 0..20 {
        let archive = Arc::clone(&archive);
        let token = issued.link.token.clone();
        tasks.push(tokio::spawn(async move { archive.resolve_share(&token).await }));
    }

    let mut served = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(file) => {
                assert_eq!(file.filename, "rtg.pdf");
                served += 1;
            }
            Err(ArchiveError::Gone) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(served, 3);

    let links = archive.list_shares("kari", doc.id).await.unwrap();
    assert_eq!(links[0].view_count, 3);
    assert_eq!(links[0].state, ShareState::Exhausted);
}

#[tokio::test]
async fn test_expired_and_revoked_links_are_gone() {
    let tmp = TempDir::new().unwrap();
    let (archive, _) = open_archive(&tmp).await;

    let doc = archive
        .upload("kari", build_pdf(&[Some("Epikrise")]), "e.pdf", &RawMetadata::default())
        .await
        .unwrap();

    let expired = archive
        .issue_share(
            "kari",
            doc.id,
            ShareOptions {
                ttl_days: Some(0),
                max_views: None,
            },
        )
        .await
        .unwrap();
    assert!(matches!(
        archive.resolve_share(&expired.link.token).await,
        Err(ArchiveError::Gone)
    ));

    let live = archive
        .issue_share("kari", doc.id, ShareOptions::default())
        .await
        .unwrap();
    archive.resolve_share(&live.link.token).await.unwrap();

    assert!(matches!(
        archive.revoke_share("ola", live.link.id).await,
        Err(ArchiveError::Forbidden)
    ));
    archive.revoke_share("kari", live.link.id).await.unwrap();
    // Revoking twice is fine.
    archive.revoke_share("kari", live.link.id).await.unwrap();
    assert!(matches!(
        archive.resolve_share(&live.link.token).await,
        Err(ArchiveError::Gone)
    ));

    let states: Vec<ShareState> = archive
        .list_shares("kari", doc.id)
        .await
        .unwrap()
        .into_iter()
        .map(|l| l.state)
        .collect();
    assert!(states.contains(&ShareState::Expired));
    assert!(states.contains(&ShareState::Revoked));
}

#[tokio::test]
async fn test_delete_cascades_notes_and_links() {
    let tmp = TempDir::new().unwrap();
    let (archive, _) = open_archive(&tmp).await;

    let doc = archive
        .upload("kari", build_pdf(&[Some("Lab")]), "lab.pdf", &RawMetadata::default())
        .await
        .unwrap();
    archive
        .add_note("kari", doc.id, "Sjekk ferritin", Some(1))
        .await
        .unwrap();
    let issued = archive
        .issue_share("kari", doc.id, ShareOptions::default())
        .await
        .unwrap();

    archive.delete_document("kari", doc.id).await.unwrap();

    assert!(matches!(
        archive.get_document("kari", doc.id).await,
        Err(ArchiveError::NotFound(_))
    ));
    assert!(matches!(
        archive.resolve_share(&issued.link.token).await,
        Err(ArchiveError::NotFound(_))
    ));
    let files = std::fs::read_dir(tmp.path().join("files")).unwrap().count();
    assert_eq!(files, 0);
}
