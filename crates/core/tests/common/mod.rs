#![allow(dead_code)]

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use pdf_chat_core::{
    DocumentService, FallbackExtractor, FsBlobStore, ModelConfig, ModelService, ServiceConfig,
    SqliteStore,
};
use std::path::Path;
use std::sync::Arc;

pub const WORDS_PER_LINE: usize = 12;

/// Builds a PDF with one page per entry. A blank entry gives a page with
/// drawing operations only, like a scanned image.
pub fn pdf_with_pages(pages: &[String]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let kids: Vec<Object> = pages
        .iter()
        .map(|text| {
            let content_id = doc.add_object(Stream::new(
                dictionary! {},
                page_content(text).encode().expect("content should encode"),
            ));
            let page_id: ObjectId = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            page_id.into()
        })
        .collect();

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Count" => kids.len() as i64,
            "Kids" => kids,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("pdf should serialize");
    bytes
}

fn page_content(text: &str) -> Content {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new("re", vec![50.into(), 50.into(), 400.into(), 600.into()]),
                Operation::new("f", vec![]),
                Operation::new("Q", vec![]),
            ],
        };
    }

    let mut operations = Vec::new();
    for (line, chunk) in words.chunks(WORDS_PER_LINE).enumerate() {
        let y = 800 - (line as i64 % 60) * 12;
        operations.push(Operation::new("BT", vec![]));
        operations.push(Operation::new("Tf", vec!["F1".into(), 9.into()]));
        operations.push(Operation::new("Td", vec![30.into(), y.into()]));
        operations.push(Operation::new(
            "Tj",
            vec![Object::string_literal(format!("{} ", chunk.join(" ")))],
        ));
        operations.push(Operation::new("ET", vec![]));
    }
    Content { operations }
}

pub fn filler(count: usize) -> Vec<String> {
    vec!["filler".to_string(); count]
}

/// 780 words: filler with a repeated torque sentence at words 380..452,
/// which only the third 200-word window (starting at word 320) covers.
pub fn manual_words() -> Vec<String> {
    let sentence = "The flange bolts need a torque of 45 Nm.";
    let mut words = filler(380);
    for _ in 0..8 {
        words.extend(sentence.split_whitespace().map(str::to_string));
    }
    let remaining = 780 - words.len();
    words.extend(filler(remaining));
    words
}

/// Three pages of 260 words each.
pub fn manual_pdf() -> Vec<u8> {
    let pages: Vec<String> = manual_words().chunks(260).map(|page| page.join(" ")).collect();
    pdf_with_pages(&pages)
}

pub fn image_only_pdf() -> Vec<u8> {
    pdf_with_pages(&[String::new()])
}

pub struct Harness {
    pub service: DocumentService,
    pub store: Arc<SqliteStore>,
}

/// Service over an on-disk SQLite database and blob directory, with the
/// real extractors, the local embedder and the extractive generator.
pub async fn harness(root: &Path) -> Harness {
    let store = Arc::new(
        SqliteStore::connect(&root.join("pdf-chat.db"))
            .await
            .expect("database opens"),
    );
    let blobs = Arc::new(FsBlobStore::open(root.join("files")).await.expect("blob dir opens"));
    let models = ModelService::init(&ModelConfig::default())
        .await
        .expect("local models start");
    let service = DocumentService::start(
        store.clone(),
        blobs,
        Arc::new(FallbackExtractor::default()),
        Arc::new(models),
        ServiceConfig::default(),
    )
    .expect("service starts");
    Harness { service, store }
}
