//! scrapeflow CLI
//!
//! Runs a crawl from the terminal, printing progress to stderr and writing
//! the record table as JSON.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use scrapeflow::config::{CrawlConfig, CrawlSettings, Credential};
use scrapeflow::events::CrawlEvent;
use scrapeflow::export::{write_records, TableFormat};
use scrapeflow::extraction::{ExtractionClient, FieldSet, HttpTransport};
use scrapeflow::fetch::{PageSource, DEFAULT_PAGE_PARAM};
use scrapeflow::observability::{init_tracing, LogFormat};
use scrapeflow::orchestrator::{CrawlOrchestrator, CrawlStatus};
use scrapeflow::providers::ProviderRegistry;
use scrapeflow::selectors::{flexible_selector, suggest_selector};
use tracing::{info, warn};

/// scrapeflow - LLM-driven structured extraction from web pages
#[derive(Parser, Debug)]
#[command(name = "scrapeflow", version, about = "Extract structured records from web pages with an LLM")]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List providers, their models and credential variables
    Providers,

    /// Crawl pages and extract records
    Crawl(CrawlArgs),

    /// Relax a rigid class selector into substring matches
    Selector(SelectorArgs),
}

#[derive(Args, Debug)]
struct ModelArgs {
    /// Provider id (see `providers`)
    #[arg(long, default_value = "gemini")]
    provider: String,

    /// Model id; defaults to the provider's first model
    #[arg(long)]
    model: Option<String>,

    /// API key; read from the provider's credential variable when omitted
    #[arg(long)]
    api_key: Option<String>,
}

#[derive(Args, Debug)]
struct CrawlArgs {
    /// Page URL to visit; repeat for several pages
    #[arg(long = "url", required_unless_present = "paginate", conflicts_with = "paginate")]
    urls: Vec<String>,

    /// Base URL to walk with a page query parameter
    #[arg(long)]
    paginate: Option<String>,

    /// Page query parameter name
    #[arg(long, default_value = DEFAULT_PAGE_PARAM)]
    page_param: String,

    /// First page number
    #[arg(long, default_value_t = 1)]
    start_page: usize,

    /// CSS selector scoping the content of each page
    #[arg(long)]
    selector: String,

    /// Relax the selector the way the `selector` command does before crawling
    #[arg(long)]
    flexible: bool,

    /// Comma-separated field names
    #[arg(long)]
    fields: String,

    #[command(flatten)]
    model: ModelArgs,

    /// Maximum pages to visit
    #[arg(long)]
    max_pages: Option<usize>,

    /// File holding a custom system prompt
    #[arg(long)]
    prompt_file: Option<PathBuf>,

    /// JSON file with crawl settings
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Fail unless exactly --max-pages pages are visited
    #[arg(long, requires = "max_pages")]
    strict: bool,

    /// Write records here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Record table format: json or csv
    #[arg(long, default_value_t = TableFormat::Json)]
    format: TableFormat,
}

#[derive(Args, Debug)]
struct SelectorArgs {
    /// The selector to relax
    selector: String,

    /// Ask the model instead of applying local rules
    #[arg(long)]
    suggest: bool,

    #[command(flatten)]
    model: ModelArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let format = if cli.log_json { LogFormat::Json } else { LogFormat::Pretty };
    init_tracing(format).context("installing log subscriber")?;

    let registry = ProviderRegistry::builtin();
    match cli.command {
        Command::Providers => list_providers(&registry),
        Command::Crawl(args) => crawl(&registry, args).await,
        Command::Selector(args) => selector(&registry, args).await,
    }
}

fn list_providers(registry: &ProviderRegistry) -> Result<()> {
    for spec in registry.iter() {
        println!("{} ({})  key: {}", spec.display_name, spec.id, spec.credential_name);
        for model in &spec.models {
            println!(
                "    {:<28} {:<10} {}",
                model.id,
                model.cost_tier.to_string(),
                model.description
            );
        }
        println!("    {}", spec.help_text);
    }
    Ok(())
}

/// Resolves the model id and reads the credential from the flag or the environment.
fn model_and_credential(registry: &ProviderRegistry, args: &ModelArgs) -> Result<(String, Credential)> {
    let model = match &args.model {
        Some(model) => model.clone(),
        None => registry.default_model(&args.provider)?.id.clone(),
    };
    let credential_name = registry.required_credential_name(&args.provider)?;
    let credential = match &args.api_key {
        Some(key) => Credential::new(key.as_str()),
        None => Credential::new(
            std::env::var(credential_name)
                .with_context(|| format!("pass --api-key or set {credential_name}"))?,
        ),
    };
    Ok((model, credential))
}

async fn crawl(registry: &ProviderRegistry, args: CrawlArgs) -> Result<()> {
    let settings = match &args.settings {
        Some(path) => CrawlSettings::from_json_file(path)
            .with_context(|| format!("reading settings from {}", path.display()))?,
        None => CrawlSettings::default(),
    };

    let source = match &args.paginate {
        Some(base) => PageSource::paginated(base.as_str())
            .with_page_param(args.page_param.as_str())
            .with_start_page(args.start_page),
        None => PageSource::urls(args.urls.iter().map(String::as_str)),
    };
    let selector = if args.flexible {
        let relaxed = flexible_selector(&args.selector);
        info!(from = %args.selector, to = %relaxed, "Relaxed selector");
        relaxed
    } else {
        args.selector.clone()
    };
    let (model, credential) = model_and_credential(registry, &args.model)?;

    let mut config = CrawlConfig::new(
        source,
        selector,
        FieldSet::parse(&args.fields)?,
        args.model.provider.as_str(),
        model,
        credential,
    )
    .with_strict(args.strict)
    .with_settings(settings);
    if let Some(limit) = args.max_pages {
        config = config.with_page_limit(limit);
    }
    if let Some(path) = &args.prompt_file {
        let prompt = std::fs::read_to_string(path)
            .with_context(|| format!("reading prompt from {}", path.display()))?;
        config = config.with_system_prompt(prompt);
    }

    let fields = config.fields.clone();
    let orchestrator = CrawlOrchestrator::http(&config.settings)?;
    let mut handle = orchestrator.spawn(config);

    let cancel = Arc::clone(&handle.cancel);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current page");
            cancel.cancel("interrupted");
        }
    });

    while let Some(event) = handle.events.recv().await {
        print_event(&event);
    }
    let report = handle.join.await.context("crawl task panicked")?;

    match &args.output {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("creating {}", path.display()))?;
            write_records(args.format, &fields, &report.records, std::io::BufWriter::new(file))
                .with_context(|| format!("writing {}", path.display()))?;
            eprintln!("Wrote {} records to {}", report.records.len(), path.display());
        }
        None => write_records(args.format, &fields, &report.records, std::io::stdout().lock())
            .context("writing records")?,
    }

    match report.status {
        CrawlStatus::Failed => match report.error {
            Some(e) => Err(e).context("crawl failed"),
            None => bail!("crawl failed"),
        },
        _ => Ok(()),
    }
}

fn print_event(event: &CrawlEvent) {
    match event {
        CrawlEvent::Started {
            provider_string,
            page_limit,
            ..
        } => match page_limit {
            Some(limit) => eprintln!("Crawling with {provider_string}, up to {limit} pages"),
            None => eprintln!("Crawling with {provider_string}"),
        },
        CrawlEvent::Page(update) => {
            let mut line = format!(
                "[page {}] {}  visited={} records={} (+{})",
                update.page_number,
                update.url,
                update.pages_visited,
                update.records_so_far,
                update.new_records
            );
            if update.chunks_failed > 0 {
                line.push_str(&format!(" dropped_chunks={}", update.chunks_failed));
            }
            if let Some(error) = &update.last_error {
                line.push_str(&format!("  error: {error}"));
            }
            eprintln!("{line}");
        }
        CrawlEvent::Finished {
            status,
            pages_visited,
            records,
            chunks_dropped,
            ..
        } => eprintln!(
            "Crawl {status}: {pages_visited} pages, {records} records, {chunks_dropped} chunks dropped"
        ),
    }
}

async fn selector(registry: &ProviderRegistry, args: SelectorArgs) -> Result<()> {
    if !args.suggest {
        println!("{}", flexible_selector(&args.selector));
        return Ok(());
    }

    let (model_id, credential) = model_and_credential(registry, &args.model)?;
    let model = registry.resolve(&args.model.provider, &model_id)?;
    let settings = CrawlSettings::default();
    let transport = HttpTransport::new(settings.extraction_timeout())?;
    let client = ExtractionClient::new(model, credential, Arc::new(transport))
        .with_retry(settings.extraction_retry.clone())
        .with_timeout(settings.extraction_timeout());

    println!("{}", suggest_selector(&client, &args.selector).await?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_crawl_args_parse() {
        let cli = Cli::try_parse_from([
            "scrapeflow",
            "crawl",
            "--paginate",
            "https://www.example.com/cars",
            "--selector",
            ".card",
            "--fields",
            "title,price",
            "--provider",
            "openai",
            "--max-pages",
            "3",
            "--strict",
        ])
        .unwrap();

        let Command::Crawl(args) = cli.command else {
            panic!("expected crawl");
        };
        assert_eq!(args.max_pages, Some(3));
        assert!(args.strict);
        assert_eq!(args.model.provider, "openai");
        assert_eq!(args.page_param, "page");
        assert_eq!(args.format, TableFormat::Json);
    }

    #[test]
    fn test_csv_format_flag() {
        let cli = Cli::try_parse_from([
            "scrapeflow", "crawl", "--url", "https://a.test", "--selector", ".x", "--fields", "a",
            "--format", "csv",
        ])
        .unwrap();

        let Command::Crawl(args) = cli.command else {
            panic!("expected crawl");
        };
        assert_eq!(args.format, TableFormat::Csv);

        let bad = Cli::try_parse_from([
            "scrapeflow", "crawl", "--url", "https://a.test", "--selector", ".x", "--fields", "a",
            "--format", "xml",
        ]);
        assert!(bad.is_err());
    }

    #[test]
    fn test_url_and_paginate_conflict() {
        let result = Cli::try_parse_from([
            "scrapeflow",
            "crawl",
            "--url",
            "https://a.test",
            "--paginate",
            "https://b.test",
            "--selector",
            ".x",
            "--fields",
            "a",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_default_model_and_flag_credential() {
        let args = ModelArgs {
            provider: "deepseek".to_string(),
            model: None,
            api_key: Some("sk-deepseek-123456".to_string()),
        };
        let (model, credential) = model_and_credential(&ProviderRegistry::builtin(), &args).unwrap();
        assert_eq!(model, "deepseek-chat");
        assert_eq!(credential.expose(), "sk-deepseek-123456");
    }
}
