use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use log::info;

use batch_translator_core::history::{list_recent_jobs, list_recent_results, RecentEntry};
use batch_translator_core::languages::{language_name, supported_codes};
use batch_translator_core::time::format_local;
use batch_translator_core::{
    AsyncTriggerProcessor, CallerIdentity, FsObjectStore, HttpBackend, HttpSyncPath, JobBuilder, KeyLayout,
    ObjectStore, Pipeline, SubmissionInput, SyncPath, SyncTranslationService, TranslationBackend,
    TranslatorConfig, TriggerListener,
};

#[derive(Debug, Parser)]
#[command(name = "batch-translator", version, about = "Batch translation with sync and async delivery")]
pub struct Cli {
    #[command(flatten)]
    common: CommonArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct CommonArgs {
    /// YAML or JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory holding job and response objects
    #[arg(long, global = true)]
    store: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Submit a batch and print the reconciled result
    Translate(TranslateArgs),
    /// Run the trigger processor for one stored job object
    Process(ProcessArgs),
    /// List recent jobs and results
    Recent(RecentArgs),
    /// List supported language codes
    Languages,
}

#[derive(Debug, Args)]
struct BackendArgs {
    /// Translation backend endpoint
    #[arg(long, env = "TRANSLATOR_BACKEND_URL")]
    backend: String,
    #[arg(long, env = "TRANSLATOR_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

#[derive(Debug, Args)]
struct TranslateArgs {
    #[command(flatten)]
    backend: BackendArgs,
    #[arg(long, required_unless_present = "file")]
    source: Option<String>,
    #[arg(long, required_unless_present = "file")]
    target: Option<String>,
    /// One item per line
    #[arg(long, conflicts_with = "file")]
    text: Option<String>,
    /// JSON file with source_language, target_language and texts
    #[arg(long)]
    file: Option<PathBuf>,
    /// Remote synchronous endpoint; the in-process service is used otherwise
    #[arg(long)]
    sync_endpoint: Option<String>,
    /// Caller id recorded on the stored job
    #[arg(long)]
    user: Option<String>,
}

#[derive(Debug, Args)]
struct ProcessArgs {
    #[command(flatten)]
    backend: BackendArgs,
    /// Job object key, e.g. jobs/<id>.json
    key: String,
}

#[derive(Debug, Args)]
struct RecentArgs {
    #[arg(long, default_value_t = 24)]
    hours: u64,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let config = load_config(self.common.config.as_deref())?;
        let store_root = match self.common.store {
            Some(path) => path,
            None => default_store_root()?,
        };
        let store: Arc<dyn ObjectStore> = Arc::new(
            FsObjectStore::new(&store_root)
                .with_context(|| format!("failed to open store at {}", store_root.display()))?,
        );

        match self.command {
            Command::Translate(args) => translate(&config, store, args).await,
            Command::Process(args) => process(&config, store, args).await,
            Command::Recent(args) => recent(&config, store.as_ref(), args).await,
            Command::Languages => {
                languages();
                Ok(())
            }
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<TranslatorConfig> {
    let config = match path {
        None => TranslatorConfig::default(),
        Some(path) if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json")) => {
            let raw = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
            TranslatorConfig::from_json(&raw)?
        }
        Some(path) => TranslatorConfig::from_yaml_file(path)?,
    };
    config.validate()?;
    Ok(config)
}

fn default_store_root() -> anyhow::Result<PathBuf> {
    let base = dirs::data_local_dir().context("no local data directory on this platform")?;
    Ok(base.join("batch-translator").join("store"))
}

fn backend(args: &BackendArgs) -> anyhow::Result<Arc<dyn TranslationBackend>> {
    let backend = HttpBackend::new(&args.backend)?.with_api_key(args.api_key.clone());
    Ok(Arc::new(backend))
}

fn processor(
    config: &TranslatorConfig,
    store: Arc<dyn ObjectStore>,
    backend: Arc<dyn TranslationBackend>,
) -> AsyncTriggerProcessor {
    AsyncTriggerProcessor::new(
        store,
        backend,
        KeyLayout::from_options(&config.storage),
        JobBuilder::new(config.limits.clone()),
        &config.dispatch,
        &config.trigger,
    )
}

async fn translate(config: &TranslatorConfig, store: Arc<dyn ObjectStore>, args: TranslateArgs) -> anyhow::Result<()> {
    let input = match (&args.file, &args.text) {
        (Some(path), _) => SubmissionInput::File {
            bytes: fs::read(path).with_context(|| format!("failed to read {}", path.display()))?,
        },
        (None, Some(text)) => SubmissionInput::Text {
            source_language: args.source.clone().unwrap_or_default(),
            target_language: args.target.clone().unwrap_or_default(),
            text: text.clone(),
        },
        (None, None) => bail!("either --text or --file is required"),
    };

    let backend = backend(&args.backend)?;
    let sync_path: Arc<dyn SyncPath> = match &args.sync_endpoint {
        Some(endpoint) => Arc::new(HttpSyncPath::new(endpoint)?),
        None => Arc::new(SyncTranslationService::new(
            Arc::clone(&backend),
            JobBuilder::new(config.limits.clone()),
            &config.dispatch,
        )),
    };

    let listener = TriggerListener::spawn(
        Arc::new(processor(config, Arc::clone(&store), backend)),
        store.subscribe(),
    );
    let pipeline = Pipeline::new(config, sync_path, store);
    let identity = args.user.map(CallerIdentity::new).unwrap_or_default();

    let outcome = pipeline.submit(input, &identity).await;
    listener.shutdown().await;
    let reconciled = outcome?;

    info!(
        "job {} reconciled: {}/{} succeeded",
        reconciled.job_id(),
        reconciled.metadata().successful_translations,
        reconciled.metadata().total_texts
    );
    println!("{}", serde_json::to_string_pretty(&reconciled)?);
    Ok(())
}

async fn process(config: &TranslatorConfig, store: Arc<dyn ObjectStore>, args: ProcessArgs) -> anyhow::Result<()> {
    let processor = processor(config, store, backend(&args.backend)?);
    let outcome = processor
        .process_key(&args.key)
        .await
        .with_context(|| format!("failed to process {}", args.key))?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn recent(config: &TranslatorConfig, store: &dyn ObjectStore, args: RecentArgs) -> anyhow::Result<()> {
    let layout = KeyLayout::from_options(&config.storage);
    let window = Duration::from_secs(args.hours.saturating_mul(3600));

    let jobs = list_recent_jobs(store, &layout, window).await?;
    let results = list_recent_results(store, &layout, window).await?;

    println!("jobs ({}):", jobs.len());
    for entry in &jobs {
        print_entry(entry);
    }
    println!("results ({}):", results.len());
    for entry in &results {
        print_entry(entry);
    }
    Ok(())
}

fn languages() {
    for code in supported_codes() {
        println!("{:<8} {}", code, language_name(code).unwrap_or_default());
    }
}

fn print_entry(entry: &RecentEntry) {
    let at = format_local(entry.last_modified);
    let languages = match (&entry.source_language, &entry.target_language) {
        (Some(source), Some(target)) => format!("{source}->{target}"),
        _ => "-".to_string(),
    };
    let texts = entry.total_texts.map_or_else(|| "-".to_string(), |n| n.to_string());
    let rate = entry
        .success_rate
        .map_or_else(String::new, |rate| format!(" {rate}%"));
    println!(
        "  {} {} {} {} texts={}{}",
        at.iso_date, at.local_time, entry.job_id, languages, texts, rate
    );
}
