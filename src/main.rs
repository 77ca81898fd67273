use anyhow::Context;
use clap::{Parser, Subcommand};
use ctgov_etl::ai::{AiClassifier, GeminiClient, PromptTemplate};
use ctgov_etl::apis::ctgov::CtGovClient;
use ctgov_etl::config::{ConfigOverrides, PipelineConfig};
use ctgov_etl::constants::{DEFAULT_COMPARISONS_CSV, DEFAULT_CONFIG_PATH, DEFAULT_CSV_FILENAME};
use ctgov_etl::filter::{filter_csv, load_ids, IdSource};
use ctgov_etl::logging;
use ctgov_etl::output::CsvFileSink;
use ctgov_etl::pipeline::{Pipeline, RunSummary};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "ctgov_etl")]
#[command(about = "ClinicalTrials.gov extract-transform-load with Gemini classification")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, normalize, classify and write trials to CSV
    Run {
        /// Configuration file (TOML, or YAML/JSON by extension)
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        /// Override output.csv_filename
        #[arg(long)]
        output: Option<PathBuf>,
        /// Skip AI classification regardless of configuration
        #[arg(long)]
        disable_ai: bool,
        /// Only classify the first N rows
        #[arg(long)]
        max_ai_rows: Option<usize>,
    },
    /// Load and validate the configuration without fetching anything
    CheckConfig {
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Keep only rows whose nct_id appears in a comparisons CSV
    Filter {
        /// CSV written by a previous run
        #[arg(long, default_value = DEFAULT_CSV_FILENAME)]
        input: PathBuf,
        /// CSV with an NCT_ID column
        #[arg(long, default_value = DEFAULT_COMPARISONS_CSV)]
        comparisons: PathBuf,
        /// Keep a single trial instead of reading the comparisons file
        #[arg(long)]
        nct_id: Option<String>,
        /// Destination (defaults to overwriting the input)
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let _guard = logging::init_logging();

    let cli = Cli::parse();

    match dispatch(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("❌ {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn dispatch(command: Commands) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Run {
            config,
            output,
            disable_ai,
            max_ai_rows,
        } => {
            let overrides = ConfigOverrides {
                output,
                disable_ai,
                max_ai_rows,
            };
            run(config, overrides).await
        }
        Commands::CheckConfig { config } => check_config(config),
        Commands::Filter {
            input,
            comparisons,
            nct_id,
            output,
        } => {
            let source = match nct_id {
                Some(id) => IdSource::Single(id),
                None => IdSource::ComparisonFile(comparisons),
            };
            let ids = load_ids(&source)?;
            let output = output.unwrap_or_else(|| input.clone());
            let summary = filter_csv(&input, &output, &ids)?;
            println!(
                "✅ Kept {} of {} rows in {}",
                summary.kept_rows,
                summary.total_rows,
                output.display()
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(config_path: PathBuf, overrides: ConfigOverrides) -> anyhow::Result<ExitCode> {
    // Everything that can fail at startup happens before the first request.
    let config = PipelineConfig::load_with(&config_path, overrides)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let api_key = config.resolve_api_key()?;

    let source = CtGovClient::new(&config.ctgov)?;
    let mut classifier = match api_key {
        Some(key) => {
            let model = GeminiClient::new(key, &config.gemini)?;
            Some(AiClassifier::from_config(&config, Box::new(model))?)
        }
        None => None,
    };
    match &classifier {
        Some(c) => info!(model = c.model_name(), "AI classification enabled"),
        None => info!("AI classification disabled"),
    }

    let mut sink = CsvFileSink::new(&config.output.csv_filename);
    let summary = Pipeline::run(&config, &source, classifier.as_mut(), &mut sink).await?;
    print_summary(&summary);

    // emit_partial is a completed run by policy; the truncation is in the summary.
    if !summary.is_complete() {
        warn!(run_id = %summary.run_id, "Run completed with partial output");
    }
    Ok(ExitCode::SUCCESS)
}

fn check_config(config_path: PathBuf) -> anyhow::Result<ExitCode> {
    let config = PipelineConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    println!("✅ {} is valid", config_path.display());
    println!("   Filter: {}", config.ctgov.filter_advanced.joined());
    println!("   Page size: {}", config.ctgov.page_size);
    println!("   Output: {}", config.output.csv_filename.display());
    if config.ai_processing.enabled {
        let model = config.gemini.model.as_deref().unwrap_or_default();
        let credential = match config.resolve_api_key() {
            Ok(_) => "present",
            Err(_) => "MISSING",
        };
        println!("   AI: enabled (model {}, column {})", model, config.ai_processing.column_name);
        println!("   Credential {}: {}", config.gemini.api_key_env, credential);
        let template = config.gemini.row_prompt_template.as_deref().unwrap_or_default();
        let template = PromptTemplate::parse(template)
            .with_context(|| "gemini.row_prompt_template".to_string())?;
        println!("   Prompt fields: {}", template.fields().join(", "));
        if let Some(max_rows) = config.ai_processing.max_rows {
            println!("   AI row cap: {}", max_rows);
        }
        if config.ai_processing.debug_only_tuning_trials {
            println!("   AI limited to tuning trials: {}", config.tuning_trials.join(", "));
        }
    } else {
        println!("   AI: disabled");
    }
    Ok(ExitCode::SUCCESS)
}

fn print_summary(summary: &RunSummary) {
    println!("\n📊 Run {}:", summary.run_id);
    println!("   Pages fetched: {}", summary.pages_fetched);
    println!("   Rows written: {}", summary.total_rows);
    if let Some(stats) = &summary.ai {
        println!(
            "   AI: {} requested, {} succeeded, {} failed, {} skipped",
            stats.requested, stats.succeeded, stats.failed, stats.skipped
        );
    }
    println!("   Duration: {:.1}s", summary.duration_secs);
    println!("   Output file: {}", summary.output);
    if let (Some(page), Some(reason)) = (summary.truncated_at_page, &summary.fetch_error) {
        println!("\n⚠️  Output is partial: page {} failed: {}", page, reason);
    }
}
