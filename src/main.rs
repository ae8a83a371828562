//! # dealdesk CLI
//!
//! ## Usage
//!
//! ```bash
//! dealdesk --config ./config/dealdesk.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dealdesk init` | Create the SQLite database and run schema migrations |
//! | `dealdesk upload <file>` | Store a file for a company/deal and queue it |
//! | `dealdesk analyze <id>` | Run the pipeline for one stored upload |
//! | `dealdesk process <bucket> <folder>` | Run the pipeline over a folder and store the results |
//! | `dealdesk status <id>` | Upload and processing status |
//! | `dealdesk uploads` | List uploads |
//! | `dealdesk results <id>` | Stored results of a folder run |
//! | `dealdesk search "<query>"` | Search summaries and redlines |
//! | `dealdesk simulate <names...>` | Print the mock results payload for file names |
//! | `dealdesk submit <files...>` | Upload files to a running server and process them |
//! | `dealdesk serve` | Start the HTTP API |

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use dealdesk::client::ApiClient;
use dealdesk::config;
use dealdesk::migrate;
use dealdesk::models::PipelineReport;
use dealdesk::pipeline::{self, AppContext};
use dealdesk::results;
use dealdesk::search;
use dealdesk::server;
use dealdesk::session::{PendingFile, RemoteSubmitter, SimulatedSubmitter, Submitter, UploadSession};
use dealdesk::upload::{self, UploadFilter, UploadRequest};

/// dealdesk: contract intake and analysis.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/dealdesk.toml` for an example.
#[derive(Parser)]
#[command(name = "dealdesk", version, about = "Contract intake and analysis service")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/dealdesk.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Upload a file for a company and deal.
    Upload {
        file: PathBuf,
        #[arg(long)]
        company: String,
        #[arg(long)]
        deal: String,
        /// Comma-separated tags.
        #[arg(long)]
        tags: Option<String>,
        #[arg(long)]
        deal_type: Option<String>,
        /// Defaults to `[storage].default_bucket`.
        #[arg(long)]
        bucket: Option<String>,
        /// Process the file right away.
        #[arg(long)]
        process: bool,
    },

    /// Run the pipeline for one stored upload.
    Analyze { upload_id: String },

    /// Run the pipeline over every file under a bucket folder and store
    /// the results.
    Process { bucket: String, folder: String },

    /// Show upload and processing status.
    Status { upload_id: String },

    /// List uploads, newest first.
    Uploads {
        /// Case-insensitive company name substring.
        #[arg(long)]
        company: Option<String>,
        /// Case-insensitive deal name substring.
        #[arg(long)]
        deal: Option<String>,
        #[arg(long)]
        limit: Option<i64>,
        #[arg(long)]
        offset: Option<i64>,
    },

    /// Show the stored results of a folder run.
    Results { pipeline_id: String },

    /// Search analysis summaries and redlines.
    Search {
        query: String,
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Print the mock results payload for the given file names.
    Simulate { files: Vec<String> },

    /// Upload files to a running server, then process their deal folder.
    Submit {
        files: Vec<PathBuf>,
        #[arg(long)]
        company: String,
        #[arg(long)]
        deal: String,
        #[arg(long)]
        tags: Option<String>,
        #[arg(long)]
        deal_type: Option<String>,
        #[arg(long, default_value = "client-context")]
        bucket: String,
        #[arg(long, env = "DEALDESK_SERVER", default_value = "http://127.0.0.1:8000")]
        server: String,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("dealdesk=info,tower_http=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Commands that don't require config
    match cli.command {
        Commands::Simulate { files } => {
            let pending = files.into_iter().map(|name| PendingFile::new(name, Vec::new()));
            let mut session = UploadSession::new("", "");
            session.add_files(pending);
            return submit_session(&mut session, &SimulatedSubmitter).await;
        }
        Commands::Submit {
            files,
            company,
            deal,
            tags,
            deal_type,
            bucket,
            server,
        } => {
            let mut session = UploadSession::new(company, deal);
            session.tags = tags.as_deref().map(upload::parse_tags).unwrap_or_default();
            session.deal_type = deal_type;
            for path in &files {
                session.add_files([PendingFile::from_path(path)?]);
            }
            let submitter = RemoteSubmitter::new(ApiClient::new(&server)?, bucket);
            return submit_session(&mut session, &submitter).await;
        }
        command => run(command, config::load_config(&cli.config)?).await,
    }
}

async fn run(command: Commands, cfg: config::Config) -> anyhow::Result<()> {
    if let Commands::Init = command {
        migrate::run_migrations(&cfg).await?;
        println!("Database initialized successfully.");
        return Ok(());
    }

    let ctx = AppContext::from_config(cfg).await?;
    match command {
        Commands::Upload {
            file,
            company,
            deal,
            tags,
            deal_type,
            bucket,
            process,
        } => {
            let bytes = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let filename = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| file.display().to_string());
            let receipt = upload::upload_file(
                &ctx,
                UploadRequest {
                    filename,
                    bytes,
                    company_name: company,
                    deal_name: deal,
                    tags: tags.as_deref().map(upload::parse_tags).unwrap_or_default(),
                    deal_type,
                    bucket,
                },
            )
            .await?;

            println!("{}", receipt.message);
            println!("  file_upload_id:    {}", receipt.file_upload_id);
            println!("  processing_job_id: {}", receipt.processing_job_id);
            println!("  path:              {}", receipt.gcs_path);
            println!("  size:              {} bytes", receipt.file_size);
            println!("  sha256:            {}", receipt.file_hash);
            if receipt.is_new_company {
                println!("  created company {}", receipt.company_id);
            }
            if receipt.is_new_deal {
                println!("  created deal {}", receipt.deal_id);
            }

            if process || ctx.config.analysis.process_on_upload {
                analyze(&ctx, &receipt.file_upload_id).await?;
            }
        }
        Commands::Analyze { upload_id } => {
            analyze(&ctx, &upload_id).await?;
        }
        Commands::Process { bucket, folder } => {
            let run = pipeline::run_pipeline(&ctx, &bucket, &folder).await?;
            print_report(&run.report);
            if run.report.status != "success" {
                anyhow::bail!("Pipeline processing failed for gs://{}/{}", bucket, folder);
            }
            let pipeline_id =
                results::store_pipeline_results(&ctx.pool, &bucket, &folder, &run).await?;
            println!("pipeline_id: {}", pipeline_id);
        }
        Commands::Status { upload_id } => {
            let view = upload::get_upload_status(&ctx.pool, &upload_id)
                .await?
                .with_context(|| format!("File upload not found: {}", upload_id))?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Commands::Uploads {
            company,
            deal,
            limit,
            offset,
        } => {
            let filter = UploadFilter {
                company_name: company,
                deal_name: deal,
            };
            let list = upload::list_uploads(&ctx.pool, &filter, limit, offset).await?;
            if list.uploads.is_empty() {
                println!("No uploads found.");
                return Ok(());
            }
            for u in &list.uploads {
                println!(
                    "{}  {:<10}  {}  {} / {}  ({} bytes)",
                    u.id,
                    u.upload_status,
                    u.original_filename,
                    u.company_name.as_deref().unwrap_or("-"),
                    u.deal_name.as_deref().unwrap_or("-"),
                    u.file_size
                );
            }
            println!(
                "showing {} of {} (offset {})",
                list.uploads.len(),
                list.total_count,
                list.offset
            );
        }
        Commands::Results { pipeline_id } => {
            let stored = results::get_pipeline_results(&ctx.pool, &pipeline_id)
                .await?
                .with_context(|| format!("Pipeline results not found: {}", pipeline_id))?;
            println!("{}", serde_json::to_string_pretty(&stored)?);
        }
        Commands::Search { query, limit } => {
            let hits = search::search(&ctx.pool, &query, limit).await?;
            if hits.is_empty() {
                println!("No results.");
                return Ok(());
            }
            for (i, hit) in hits.iter().enumerate() {
                println!(
                    "{}. [{:.2}] {:?} {}",
                    i + 1,
                    hit.score,
                    hit.kind,
                    hit.filename
                );
                println!("    {}", hit.snippet);
            }
        }
        Commands::Serve => {
            server::serve(ctx).await?;
        }
        Commands::Init | Commands::Simulate { .. } | Commands::Submit { .. } => {
            unreachable!("handled before the context is built")
        }
    }
    Ok(())
}

async fn analyze(ctx: &AppContext, upload_id: &str) -> anyhow::Result<()> {
    let done = pipeline::process_upload(ctx, upload_id)
        .await?
        .with_context(|| format!("File upload not found: {}", upload_id))?;
    print_report(&done.report);
    if let Some(analysis_id) = &done.analysis_id {
        println!("analysis_id: {}", analysis_id);
    }
    Ok(())
}

async fn submit_session(session: &mut UploadSession, submitter: &dyn Submitter) -> anyhow::Result<()> {
    match session.submit(submitter).await {
        Ok(note) => {
            eprintln!("{}: {}", note.title, note.message);
            if let Some(report) = &session.results {
                println!("{}", serde_json::to_string_pretty(report)?);
            }
            Ok(())
        }
        Err(e) => {
            let note = e.notification();
            eprintln!("{}: {}", note.title, note.message);
            Err(e.into())
        }
    }
}

fn print_report(report: &PipelineReport) {
    for line in &report.processing_log {
        println!("  {}", line);
    }
    println!(
        "status: {}  files: {}  chunks: {}  analyzed: {}",
        report.status,
        report.summary.files_processed,
        report.summary.chunks_created,
        report.summary.documents_analyzed
    );
    for (name, result) in &report.results {
        println!(
            "{}: {} ({:.2}), {} redline(s), {} common ground(s)",
            name,
            result.classification.kind,
            result.classification.confidence,
            result.redlines.len(),
            result.common_grounds.len()
        );
        for r in &result.redlines {
            println!("    [{}] {}", r.severity, r.issue);
        }
    }
    for w in &report.warnings {
        println!("warning: {}", w);
    }
    for e in &report.errors {
        println!("error: {}", e);
    }
}
