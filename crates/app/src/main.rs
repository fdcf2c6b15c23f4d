use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use pdf_chat_core::extractor::run_guarded;
use pdf_chat_core::{
    discover_pdf_files, join_pages, ChunkingConfig, DocumentId, DocumentService, EmbeddingBackend,
    FallbackExtractor, FsBlobStore, GenerationBackend, ModelConfig, ModelService, OwnerId,
    PageExtractor, ProcessingMode, QueryOptions, QueueOptions, ServiceConfig, SqliteStore,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EmbedderKind {
    Ngram,
    Ollama,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum GeneratorKind {
    Extractive,
    Ollama,
}

#[derive(Parser)]
#[command(name = "pdf-chat", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// SQLite database holding documents and chunks
    #[arg(long, env = "PDF_CHAT_DB", default_value = "pdf-chat.db")]
    db: PathBuf,

    /// Directory where uploaded PDFs are kept
    #[arg(long, env = "PDF_CHAT_BLOB_DIR", default_value = "pdf-chat-files")]
    blob_dir: PathBuf,

    /// Identity the command acts as; documents are only visible to their owner
    #[arg(long, env = "PDF_CHAT_OWNER")]
    owner: Option<String>,

    #[arg(long, env = "PDF_CHAT_EMBEDDER", value_enum, default_value = "ngram")]
    embedder: EmbedderKind,

    #[arg(long, env = "PDF_CHAT_GENERATOR", value_enum, default_value = "extractive")]
    generator: GeneratorKind,

    /// Ollama base URL
    #[arg(long, env = "OLLAMA_URL", default_value = "http://localhost:11434")]
    ollama_url: String,

    #[arg(long, env = "PDF_CHAT_EMBEDDING_MODEL", default_value = "nomic-embed-text")]
    embedding_model: String,

    #[arg(long, env = "PDF_CHAT_GENERATION_MODEL", default_value = "llama3.2")]
    generation_model: String,

    /// Embedding width; probed from Ollama when omitted
    #[arg(long, env = "PDF_CHAT_EMBEDDING_DIMENSIONS")]
    embedding_dimensions: Option<usize>,

    /// Words per chunk
    #[arg(long, env = "PDF_CHAT_CHUNK_SIZE", default_value = "200")]
    chunk_size: usize,

    /// Words shared by consecutive chunks
    #[arg(long, env = "PDF_CHAT_CHUNK_OVERLAP", default_value = "40")]
    chunk_overlap: usize,

    /// Passages retrieved per question
    #[arg(long, env = "PDF_CHAT_TOP_K", default_value = "5")]
    top_k: usize,

    /// Upper bound on answer length, in tokens
    #[arg(long, env = "PDF_CHAT_MAX_ANSWER_TOKENS", default_value = "200")]
    max_answer_tokens: usize,

    /// Background processing workers
    #[arg(long, env = "PDF_CHAT_WORKERS", default_value = "2")]
    workers: usize,

    /// Jobs that may wait for a worker before uploads block
    #[arg(long, env = "PDF_CHAT_QUEUE_CAPACITY", default_value = "64")]
    queue_capacity: usize,

    /// Model HTTP timeout in seconds
    #[arg(long, env = "PDF_CHAT_REQUEST_TIMEOUT", default_value = "120")]
    request_timeout_secs: u64,
}

#[derive(Subcommand)]
enum Command {
    /// Upload one PDF and process it in the background.
    Upload {
        file: PathBuf,
        /// Title to store instead of the file name.
        #[arg(long)]
        title: Option<String>,
    },
    /// Upload every PDF found recursively under a folder.
    UploadFolder {
        #[arg(long)]
        folder: PathBuf,
    },
    /// Reprocess a document and wait for the result.
    Process { id: DocumentId },
    /// List the owner's documents with their processing status.
    List,
    /// Show the stored chunks of a document.
    Chunks { id: DocumentId },
    /// Ask a question about a document.
    Ask {
        id: DocumentId,
        question: String,
        /// Print the retrieved passages after the answer.
        #[arg(long, default_value_t = false)]
        show_passages: bool,
    },
    /// Write the uploaded bytes of a document to a file.
    Fetch {
        id: DocumentId,
        #[arg(long)]
        output: PathBuf,
    },
    /// Process every document that has no chunks yet.
    Backfill,
    /// Run each extraction method on a PDF and report what it finds.
    Extract {
        file: PathBuf,
        /// Characters of text to print per method.
        #[arg(long, default_value = "300")]
        sample_chars: usize,
    },
}

impl Cli {
    fn model_config(&self) -> ModelConfig {
        let embedding = match self.embedder {
            EmbedderKind::Ngram => EmbeddingBackend::Ngram {
                dimensions: self.embedding_dimensions.unwrap_or(DEFAULT_EMBEDDING_DIMENSIONS),
            },
            EmbedderKind::Ollama => EmbeddingBackend::Ollama {
                base_url: self.ollama_url.clone(),
                model: self.embedding_model.clone(),
                dimensions: self.embedding_dimensions,
            },
        };
        let generation = match self.generator {
            GeneratorKind::Extractive => GenerationBackend::Extractive,
            GeneratorKind::Ollama => GenerationBackend::Ollama {
                base_url: self.ollama_url.clone(),
                model: self.generation_model.clone(),
            },
        };
        ModelConfig {
            embedding,
            generation,
            request_timeout_secs: self.request_timeout_secs,
        }
    }

    fn service_config(&self) -> anyhow::Result<ServiceConfig> {
        Ok(ServiceConfig {
            chunking: ChunkingConfig::new(self.chunk_size, self.chunk_overlap)?,
            query: QueryOptions {
                top_k: self.top_k,
                max_answer_tokens: self.max_answer_tokens,
            },
            queue: QueueOptions {
                workers: self.workers,
                capacity: self.queue_capacity,
            },
        })
    }

    fn owner(&self) -> Option<OwnerId> {
        self.owner
            .as_deref()
            .map(str::trim)
            .filter(|owner| !owner.is_empty())
            .map(OwnerId::new)
    }
}

async fn open_service(cli: &Cli) -> anyhow::Result<DocumentService> {
    let store = SqliteStore::connect(&cli.db)
        .await
        .with_context(|| format!("opening database {}", cli.db.display()))?;
    let blobs = FsBlobStore::open(&cli.blob_dir)
        .await
        .with_context(|| format!("opening blob directory {}", cli.blob_dir.display()))?;
    let models = ModelService::init(&cli.model_config())
        .await
        .context("initializing models")?;

    let service = DocumentService::start(
        Arc::new(store),
        Arc::new(blobs),
        Arc::new(FallbackExtractor::default()),
        Arc::new(models),
        cli.service_config()?,
    )?;
    Ok(service)
}

async fn upload_file(
    service: &DocumentService,
    owner: Option<&OwnerId>,
    path: &Path,
    title: Option<String>,
) -> anyhow::Result<DocumentId> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let title = title.unwrap_or_else(|| {
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    });
    let document = service.upload(owner, bytes, &title).await?;
    Ok(document.id)
}

fn sample(text: &str, chars: usize) -> String {
    let mut sampled: String = text.chars().take(chars).collect();
    if text.chars().count() > chars {
        sampled.push_str("...");
    }
    sampled
}

fn extract_report(file: &Path, sample_chars: usize) -> anyhow::Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let extractor = FallbackExtractor::default();

    for method in [extractor.primary(), extractor.secondary()] {
        match run_guarded(method, &bytes) {
            Ok(pages) => {
                let text = join_pages(&pages);
                println!(
                    "[{}] pages={} chars={} words={}",
                    method.name(),
                    pages.len(),
                    text.chars().count(),
                    text.split_whitespace().count()
                );
                if !text.is_empty() {
                    println!("  sample: {}", sample(&text, sample_chars));
                }
            }
            Err(error) => println!("[{}] failed: {error}", method.name()),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "pdf-chat boot"
    );

    if let Command::Extract { file, sample_chars } = &cli.command {
        return extract_report(file, *sample_chars);
    }

    let service = open_service(&cli).await?;
    let owner = cli.owner();
    let owner = owner.as_ref();

    let outcome = run(&cli, &service, owner).await;
    let stats = service.shutdown().await;
    if stats.submitted > 0 {
        info!(
            succeeded = stats.succeeded,
            failed = stats.failed,
            "background processing finished"
        );
    }

    if let Some(uploaded) = outcome? {
        // Background runs are done once the queue has drained.
        for id in uploaded {
            let document = service.document(id, owner).await?;
            match &document.processing_error {
                Some(reason) => println!("{id} {} {} ({reason})", document.title, document.processing_status),
                None => println!("{id} {} {}", document.title, document.processing_status),
            }
        }
    }

    Ok(())
}

/// Runs the command; returns the ids of uploads whose final status is
/// reported after the queue drains.
async fn run(
    cli: &Cli,
    service: &DocumentService,
    owner: Option<&OwnerId>,
) -> anyhow::Result<Option<Vec<DocumentId>>> {
    match &cli.command {
        Command::Upload { file, title } => {
            let id = upload_file(service, owner, file, title.clone()).await?;
            println!("uploaded {id}");
            Ok(Some(vec![id]))
        }
        Command::UploadFolder { folder } => {
            let files = discover_pdf_files(folder);
            info!(folder = %folder.display(), files = files.len(), "uploading folder");

            let mut uploaded = Vec::with_capacity(files.len());
            for path in files {
                match upload_file(service, owner, &path, None).await {
                    Ok(id) => uploaded.push(id),
                    Err(error) => warn!(path = %path.display(), %error, "skipped pdf"),
                }
            }
            println!("{} files uploaded at {}", uploaded.len(), Utc::now().to_rfc3339());
            Ok(Some(uploaded))
        }
        Command::Process { id } => {
            service
                .trigger_processing(*id, ProcessingMode::Sync, owner)
                .await?;
            let chunks = service.list_chunks(*id, owner).await?;
            println!("{id} done, {} chunks", chunks.len());
            Ok(None)
        }
        Command::List => {
            for summary in service.list_documents(owner).await? {
                match &summary.processing_error {
                    Some(reason) => println!(
                        "{} {} {} ({reason})",
                        summary.id, summary.title, summary.processing_status
                    ),
                    None => println!("{} {} {}", summary.id, summary.title, summary.processing_status),
                }
            }
            Ok(None)
        }
        Command::Chunks { id } => {
            for chunk in service.list_chunks(*id, owner).await? {
                let page = chunk
                    .page_number
                    .map_or_else(|| "-".to_string(), |page| page.to_string());
                println!("[{}] id={} page={page}", chunk.order, chunk.id);
                println!("{}", chunk.chunk_text);
            }
            Ok(None)
        }
        Command::Ask {
            id,
            question,
            show_passages,
        } => {
            let answer = service.ask(*id, question, owner).await?;
            println!("{}", answer.answer);
            if *show_passages {
                for passage in &answer.passages {
                    let page = passage
                        .page_number
                        .map_or_else(|| "-".to_string(), |page| page.to_string());
                    println!(
                        "  chunk={} page={page} distance={:.4}",
                        passage.order, passage.distance
                    );
                }
            }
            Ok(None)
        }
        Command::Fetch { id, output } => {
            let bytes = service.fetch_file(*id, owner).await?;
            tokio::fs::write(output, &bytes)
                .await
                .with_context(|| format!("writing {}", output.display()))?;
            println!("{} bytes written to {}", bytes.len(), output.display());
            Ok(None)
        }
        Command::Backfill => {
            let report = service.backfill().await?;
            for entry in &report {
                match (&entry.chunks_created, &entry.error) {
                    (Some(chunks), _) => println!("{} {} done, {chunks} chunks", entry.document_id, entry.title),
                    (None, Some(reason)) => {
                        println!("{} {} failed: {reason}", entry.document_id, entry.title)
                    }
                    (None, None) => println!("{} {} skipped", entry.document_id, entry.title),
                }
            }
            println!("{} documents backfilled", report.len());
            Ok(None)
        }
        Command::Extract { .. } => Ok(None),
    }
}
