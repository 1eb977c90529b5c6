use chrono::Utc;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use pocket_ledger::{
    config::{self, AppConfig},
    errors::{Error, Result},
    scheduler::{self, Job, Scheduler},
    services::{
        FallbackInsights, GeminiInsights, Insights, JobContext, LogNotifier, Notifier,
        ResendNotifier, http_client, insights::image_mime_type,
    },
};
use std::{env, path::PathBuf, sync::Arc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all jobs on their timers until interrupted (default)
    Run,
    /// Run a single job now and exit
    Once {
        #[arg(value_enum)]
        job: Job,
    },
    /// Create the database tables and exit
    InitDb,
    /// Extract transaction fields from a receipt image
    ScanReceipt {
        /// JPEG, PNG, WEBP or HEIC image
        image: PathBuf,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file; variables may also be set externally
    dotenv().ok();

    let cli = Cli::parse();

    // 3. Load and check the application configuration
    let app_config = config::app::load_config_or_default(&cli.config)
        .inspect_err(|e| error!("Failed to load configuration: {}", e))?;
    app_config.validate()?;

    // 4. Connect and make sure the schema exists
    let db = config::database::create_connection()
        .await
        .inspect_err(|e| error!("Failed to connect to database: {}", e))?;
    config::database::create_tables(&db).await?;

    let ctx = build_context(db, &app_config)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            Scheduler::new(ctx, &app_config)
                .run(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!("Failed to listen for ctrl-c: {}", e);
                    }
                })
                .await?;
        }
        Commands::Once { job } => {
            let summary = scheduler::run_job_once(&ctx, job, Utc::now()).await?;
            info!(?summary, "Job finished");
        }
        Commands::InitDb => info!("Database initialized"),
        Commands::ScanReceipt { image } => {
            let mime_type = image_mime_type(&image).ok_or_else(|| Error::Validation {
                message: format!("Unsupported image type: {}", image.display()),
            })?;
            let bytes = std::fs::read(&image)?;
            match ctx
                .bounded(ctx.insights.extract_receipt_fields(&bytes, mime_type))
                .await?
            {
                Some(fields) => info!(?fields, "Receipt scanned"),
                None => warn!("Image does not look like a receipt"),
            }
        }
    }

    Ok(())
}

/// Picks the collaborator adapters from the API keys present in the environment.
fn build_context(db: sea_orm::DatabaseConnection, app_config: &AppConfig) -> Result<JobContext> {
    let collaborator_timeout = app_config.schedule.collaborator_timeout();
    let client = http_client(collaborator_timeout)?;

    let notifier: Arc<dyn Notifier> = match env::var("RESEND_API_KEY") {
        Ok(key) if !key.is_empty() => Arc::new(ResendNotifier::new(
            client.clone(),
            key,
            &app_config.notifications,
        )),
        _ => {
            warn!("RESEND_API_KEY not set, notifications will only be logged");
            Arc::new(LogNotifier)
        }
    };

    let insights: Arc<dyn Insights> = match env::var("GEMINI_API_KEY") {
        Ok(key) if !key.is_empty() => {
            Arc::new(GeminiInsights::new(client, key, &app_config.insights))
        }
        _ => {
            warn!("GEMINI_API_KEY not set, reports will use generic insights");
            Arc::new(FallbackInsights)
        }
    };

    Ok(JobContext {
        db,
        notifier,
        insights,
        collaborator_timeout,
    })
}
