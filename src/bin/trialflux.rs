//! Trial Flux CLI - Command-line interface for Trial Flux
//!
//! Commands:
//! - run: Process a directory of participant logs into analysis tables
//! - validate: Load and clean every participant log without writing output
//! - config: Print the effective configuration as TOML
//! - schema: Describe the expected input columns and derived fields

use clap::{Parser, Subcommand, ValueEnum};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use trial_flux::assembler::excluded_by;
use trial_flux::export::{OutputFormat, TableExporter};
use trial_flux::pipeline::PipelineOutput;
use trial_flux::{
    CorpusAssembler, ExperimentPipeline, PipelineConfig, PipelineError, RawTrialLoader,
    TrialRecordCleaner, FLUX_VERSION,
};

/// Trial Flux - Batch pipeline for behavioral-experiment trial logs
#[derive(Parser)]
#[command(name = "trialflux")]
#[command(version = FLUX_VERSION)]
#[command(about = "Clean and aggregate per-participant trial logs", long_about = None)]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process a directory of participant logs
    Run {
        /// Directory containing one delimited file per participant
        #[arg(short, long)]
        data_dir: PathBuf,

        /// Demographics file keyed by participant
        #[arg(long)]
        demographics: Option<PathBuf>,

        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Directory to write tables into (summary only when omitted)
        #[arg(short, long)]
        out_dir: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "csv")]
        output_format: Format,

        /// Response time ceiling in seconds (overrides the configuration)
        #[arg(long)]
        ceiling: Option<f64>,

        /// Additional excluded-file pattern (repeatable)
        #[arg(long = "exclude")]
        exclude: Vec<String>,

        /// Exit successfully even when some participant files failed
        #[arg(long)]
        allow_failures: bool,
    },

    /// Load and clean every participant log without writing output
    Validate {
        /// Directory containing one delimited file per participant
        #[arg(short, long)]
        data_dir: PathBuf,

        /// Demographics file (skipped during discovery and checked separately)
        #[arg(long)]
        demographics: Option<PathBuf>,

        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as TOML
    Config {
        /// TOML configuration file to merge over the defaults
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Describe the expected input columns and derived fields
    Schema {
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    /// Comma-separated values
    Csv,
    /// JSON array per table
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

impl From<Format> for OutputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Csv => OutputFormat::Csv,
            Format::Json => OutputFormat::Json,
            Format::JsonPretty => OutputFormat::JsonPretty,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "trial_flux=debug,trialflux=debug"
    } else {
        "trial_flux=info,trialflux=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), FluxCliError> {
    match cli.command {
        Commands::Run {
            data_dir,
            demographics,
            config,
            out_dir,
            output_format,
            ceiling,
            exclude,
            allow_failures,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(ceiling) = ceiling {
                config.outlier_ceiling_secs = ceiling;
            }
            config.excluded_patterns.extend(exclude);

            cmd_run(
                &data_dir,
                demographics.as_deref(),
                config,
                out_dir.as_deref(),
                output_format.into(),
                allow_failures,
            )
        }

        Commands::Validate {
            data_dir,
            demographics,
            config,
            json,
        } => {
            let config = load_config(config.as_deref())?;
            cmd_validate(&data_dir, demographics.as_deref(), &config, json)
        }

        Commands::Config { config } => {
            let config = load_config(config.as_deref())?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }

        Commands::Schema { config } => {
            let config = load_config(config.as_deref())?;
            cmd_schema(&config);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig, FluxCliError> {
    match path {
        Some(path) => Ok(PipelineConfig::load(path)?),
        None => Ok(PipelineConfig::default()),
    }
}

fn cmd_run(
    data_dir: &Path,
    demographics: Option<&Path>,
    config: PipelineConfig,
    out_dir: Option<&Path>,
    output_format: OutputFormat,
    allow_failures: bool,
) -> Result<(), FluxCliError> {
    let delimiter = config.delimiter_byte();
    let pipeline = ExperimentPipeline::new(config)?;
    let output = pipeline.run_directory(data_dir, demographics)?;

    if output.report.assembly.files_seen == 0 {
        return Err(FluxCliError::NoFiles);
    }

    if let Some(out_dir) = out_dir {
        TableExporter::new(output_format)
            .with_delimiter(delimiter)
            .write_output(out_dir, &output)?;
    }

    print_summary(&output);

    if output.has_failures() && !allow_failures {
        Err(FluxCliError::FilesFailed(output.failures.len()))
    } else {
        Ok(())
    }
}

fn print_summary(output: &PipelineOutput) {
    let assembly = &output.report.assembly;
    let outlier = &output.report.outlier;

    println!("Trial Flux Run {}", output.report.run_id);
    println!("==================");
    println!("Files seen:       {}", assembly.files_seen);
    println!("Files excluded:   {}", assembly.files_excluded.len());
    println!("Files failed:     {}", assembly.files_failed.len());
    println!("Participants:     {}", assembly.participants);
    println!("Rows assembled:   {}", assembly.rows_assembled);
    println!("Undefined errors: {}", assembly.undefined_error_dropped);
    println!(
        "Outliers:         {} ({:.2}% at >= {}s)",
        outlier.excluded_rows,
        outlier.excluded_fraction * 100.0,
        outlier.ceiling_secs
    );
    println!("Analysis rows:    {}", output.analysis.len());

    if !assembly.participants_without_demographics.is_empty() {
        println!(
            "\nWithout demographics: {}",
            assembly.participants_without_demographics.join(", ")
        );
    }

    if !output.failures.is_empty() {
        println!("\nFailures:");
        for failure in &output.failures {
            println!("  - {}", failure);
        }
    }
}

fn cmd_validate(
    data_dir: &Path,
    demographics: Option<&Path>,
    config: &PipelineConfig,
    json: bool,
) -> Result<(), FluxCliError> {
    config.validate()?;
    let loader = RawTrialLoader::new(config);
    let cleaner = TrialRecordCleaner::new(config);
    let files = CorpusAssembler::new(config).discover(data_dir, demographics)?;

    let mut entries = Vec::new();
    let mut excluded = Vec::new();
    for path in &files {
        if let Some(pattern) = excluded_by(path, &config.excluded_patterns) {
            excluded.push(ExcludedFile {
                path: path.display().to_string(),
                pattern: pattern.to_string(),
            });
            continue;
        }

        let entry = match loader.load(path).and_then(|raw| cleaner.clean(raw)) {
            Ok(cleaned) => FileValidation {
                path: path.display().to_string(),
                ok: true,
                rows: Some(cleaned.report.output_rows),
                error: None,
            },
            Err(e) => FileValidation {
                path: path.display().to_string(),
                ok: false,
                rows: None,
                error: Some(format!("[{}] {}", e.rule(), e)),
            },
        };
        entries.push(entry);
    }

    if let Some(path) = demographics {
        let entry = match loader.load_demographics(path) {
            Ok(table) => FileValidation {
                path: path.display().to_string(),
                ok: true,
                rows: Some(table.len()),
                error: None,
            },
            Err(e) => FileValidation {
                path: path.display().to_string(),
                ok: false,
                rows: None,
                error: Some(format!("[{}] {}", e.rule(), e)),
            },
        };
        entries.push(entry);
    }

    let invalid = entries.iter().filter(|e| !e.ok).count();
    let report = ValidationReport {
        total_files: entries.len(),
        valid_files: entries.len() - invalid,
        invalid_files: invalid,
        files: entries,
        excluded,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total files:   {}", report.total_files);
        println!("Valid files:   {}", report.valid_files);
        println!("Invalid files: {}", report.invalid_files);
        println!("Excluded:      {}", report.excluded.len());

        let errors: Vec<&FileValidation> = report.files.iter().filter(|f| !f.ok).collect();
        if !errors.is_empty() {
            println!("\nErrors:");
            for file in errors {
                println!("  - {}: {}", file.path, file.error.as_deref().unwrap_or("unknown"));
            }
        }
    }

    if files.is_empty() {
        Err(FluxCliError::NoFiles)
    } else if report.invalid_files > 0 {
        Err(FluxCliError::ValidationFailed(report.invalid_files))
    } else {
        Ok(())
    }
}

fn cmd_schema(config: &PipelineConfig) {
    let columns = &config.columns;

    println!("Input Schema");
    println!();
    println!("One delimited file per participant (delimiter {:?}) with columns:", config.delimiter);
    println!("  - {:<20} participant identifier", columns.participant);
    println!("  - {:<20} zero-based block index", columns.block_index);
    println!("  - {:<20} zero-based trial index within the block", columns.trial_index);
    println!("  - {:<20} orientation of the target person", columns.facing_direction);
    println!("  - {:<20} side the food item is shown on", columns.show_side);
    println!("  - {:<20} target person code", columns.target_person);
    println!("  - {:<20} food item code", columns.food_item);
    println!(
        "  - {:<20} one of {}",
        columns.consistency_raw,
        config
            .consistency_remap
            .keys()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("  - {:<20} key pressed", columns.response_key);
    println!("  - {:<20} response time in seconds", columns.response_time);
    println!();
    println!("Missing markers: {:?}", config.missing_markers);
    println!();
    println!("Derived fields:");
    println!("  - trial_sequence_number  dense 1-based position after incomplete rows are dropped");
    println!(
        "  - visibility             Visible ({}) when facing direction equals show side, else NotVisible ({})",
        config.contrasts.visible, config.contrasts.not_visible
    );
    for (code, label) in &config.consistency_remap {
        println!("  - consistency            {} -> {}", code, label);
    }
    for entry in &config.error_table.entries {
        println!(
            "  - is_error               key {:?} with food group {:?} -> {}",
            entry.response_key, entry.food_group, entry.outcome
        );
    }
    println!(
        "\nWarm-up rule: drop block {} trial {}",
        config.warmup.block_index, config.warmup.trial_index
    );
    println!("Outlier ceiling: {}s (exclusive)", config.outlier_ceiling_secs);
}

// Error types

#[derive(Debug)]
enum FluxCliError {
    Pipeline(PipelineError),
    Json(serde_json::Error),
    NoFiles,
    FilesFailed(usize),
    ValidationFailed(usize),
}

impl From<PipelineError> for FluxCliError {
    fn from(e: PipelineError) -> Self {
        FluxCliError::Pipeline(e)
    }
}

impl From<serde_json::Error> for FluxCliError {
    fn from(e: serde_json::Error) -> Self {
        FluxCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<FluxCliError> for CliError {
    fn from(e: FluxCliError) -> Self {
        match e {
            FluxCliError::Pipeline(e) => CliError {
                code: format!("PIPELINE_{}", e.rule().to_uppercase()),
                message: e.to_string(),
                hint: Some("Run 'trialflux validate' for per-file details".to_string()),
            },
            FluxCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            FluxCliError::NoFiles => CliError {
                code: "NO_FILES".to_string(),
                message: "No participant files found".to_string(),
                hint: Some("Check --data-dir and the configured file extension".to_string()),
            },
            FluxCliError::FilesFailed(count) => CliError {
                code: "FILES_FAILED".to_string(),
                message: PipelineError::BatchFailed(count).to_string(),
                hint: Some(
                    "Outputs contain the remaining files; pass --allow-failures to accept"
                        .to_string(),
                ),
            },
            FluxCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} files failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    total_files: usize,
    valid_files: usize,
    invalid_files: usize,
    files: Vec<FileValidation>,
    excluded: Vec<ExcludedFile>,
}

#[derive(serde::Serialize)]
struct ExcludedFile {
    path: String,
    pattern: String,
}

#[derive(serde::Serialize)]
struct FileValidation {
    path: String,
    ok: bool,
    rows: Option<usize>,
    error: Option<String>,
}
