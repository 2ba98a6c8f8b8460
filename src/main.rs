use clap::Parser;
use site_batch::batch::{BatchExport, BatchStore};
use site_batch::{BatchRunner, ChatAnnotator, ProgressEvent, SqliteBatchStore, WebDriverFetcher};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

mod args;
use args::{Args, Command, RunArgs};

type AppResult<T> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::init();

    let args = Args::parse();

    if let Err(e) = dispatch(args).await {
        ::log::error!("{}", e);
        std::process::exit(1);
    }
}

async fn dispatch(args: Args) -> AppResult<()> {
    let store = SqliteBatchStore::open(&args.db).await?;

    match args.command {
        Command::Run(run_args) => run(store, &run_args).await,
        Command::List => list(&store).await,
        Command::Show { id, output } => {
            let export = BatchExport::load(&store, id).await?;
            write_export(&export, output.as_deref())
        }
    }
}

async fn run(store: SqliteBatchStore, args: &RunArgs) -> AppResult<()> {
    let config = args.batch_config()?;

    ::log::info!("Starting batch for {}", config.crawl.seed_url);
    println!("Note: crawling requires a WebDriver server (e.g., ChromeDriver).");
    println!("Using WebDriver at {}", config.browser.webdriver_url);

    let store = Arc::new(store);
    let fetcher = Arc::new(WebDriverFetcher::new(config.browser.clone()));
    let mut runner = BatchRunner::new(store.clone(), fetcher);
    if !config.prompts.is_empty() {
        ::log::info!(
            "Answering {} prompts with {} at {}",
            config.prompts.len(),
            config.annotator.model,
            config.annotator.endpoint
        );
        runner = runner.with_annotator(Arc::new(ChatAnnotator::new(&config.annotator)?));
    }
    runner.subscribe(Arc::new(|event: &ProgressEvent| println!("{}", event)));

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ::log::warn!("Interrupted, cancelling batch");
            on_ctrl_c.cancel();
        }
    });

    let start_time = std::time::Instant::now();
    let report = runner.run(config.crawl, &config.prompts, &cancel).await?;

    ::log::info!(
        "Batch #{} complete - {} sites, {} answers in {:.2} seconds",
        report.batch.id,
        report.sites.len(),
        report.responses,
        start_time.elapsed().as_secs_f64()
    );

    if let Some(path) = args.output.as_deref() {
        let export = BatchExport::load(store.as_ref(), report.batch.id).await?;
        write_export(&export, Some(path))?;
    }
    Ok(())
}

async fn list(store: &SqliteBatchStore) -> AppResult<()> {
    for batch in store.batches().await? {
        let finished = match batch.finished_at {
            Some(at) => at.format("%d/%m/%y %H:%M").to_string(),
            None => "unfinished".to_string(),
        };
        println!(
            "#{}\t{}\tdepth {}\t{} pages\t{}",
            batch.id, batch.seed_url, batch.max_depth, batch.max_pages, finished
        );
    }
    Ok(())
}

fn write_export(export: &BatchExport, output: Option<&Path>) -> AppResult<()> {
    let json = serde_json::to_string_pretty(export)?;
    match output {
        Some(path) => std::fs::write(path, json)?,
        None => println!("{}", json),
    }
    Ok(())
}
