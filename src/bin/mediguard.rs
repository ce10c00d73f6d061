//! MediGuard CLI - command-line interface for MediGuard Drift
//!
//! Commands:
//! - analyze: Run the pipeline on a snapshot and write the encoded result
//! - validate: Check a snapshot against the input schema
//! - doctor: Diagnose configuration and environment
//! - schema: Print input, output or config schema information

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, info};

use mediguard_drift::encoder::{ResultEnvelope, RESULT_SCHEMA_VERSION};
use mediguard_drift::{
    analyze, explain_with_fallback, Explanation, InputValidationError, PipelineConfig,
    ResultEncoder, RuleBasedExplainer, Snapshot, MEDIGUARD_VERSION, PRODUCER_NAME,
    SCHEMA_VERSION,
};

/// MediGuard - deterministic health-drift detection
#[derive(Parser)]
#[command(name = "mediguard")]
#[command(author = "MediGuard Contributors")]
#[command(version = MEDIGUARD_VERSION)]
#[command(about = "Detect drift in daily check metrics and decide on escalation", long_about = None)]
struct Cli {
    /// Log pipeline stages at debug level (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a snapshot and write the encoded result
    Analyze {
        /// Input snapshot path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Pipeline configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Attach a rule-based explanation to the output
        #[arg(long)]
        explain: bool,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Validate a snapshot without analyzing it
    Validate {
        /// Input snapshot path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Pipeline configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration and environment
    Doctor {
        /// Check a configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print schema information
    Schema {
        #[arg(value_enum)]
        schema_type: SchemaType,
    },
}

#[derive(Clone, ValueEnum)]
enum SchemaType {
    /// Input snapshot (mediguard.snapshot.v1)
    Input,
    /// Encoded result (mediguard.result.v1)
    Output,
    /// Default pipeline configuration
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli.command) {
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

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("mediguard_drift=debug,mediguard=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .init();
}

fn run(command: Commands) -> Result<(), MediguardCliError> {
    match command {
        Commands::Analyze {
            input,
            output,
            config,
            explain,
            pretty,
        } => cmd_analyze(&input, &output, config.as_deref(), explain, pretty),

        Commands::Validate {
            input,
            config,
            json,
        } => cmd_validate(&input, config.as_deref(), json),

        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),

        Commands::Schema { schema_type } => cmd_schema(schema_type),
    }
}

fn read_input(input: &Path) -> Result<String, MediguardCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig, MediguardCliError> {
    let config = match path {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            PipelineConfig::from_json(&fs::read_to_string(path)?)?
        }
        None => PipelineConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// Encoded result, optionally with an explanation alongside
#[derive(serde::Serialize)]
struct AnalyzeOutput {
    #[serde(flatten)]
    envelope: ResultEnvelope,
    #[serde(skip_serializing_if = "Option::is_none")]
    explanation: Option<Explanation>,
}

fn cmd_analyze(
    input: &Path,
    output: &Path,
    config: Option<&Path>,
    explain: bool,
    pretty: bool,
) -> Result<(), MediguardCliError> {
    let config = load_config(config)?;
    let snapshot = Snapshot::from_json(&read_input(input)?)?;

    let result = analyze(&snapshot, &config)?;
    if result.safety_decision.escalate {
        info!(
            user_id = %result.user_id,
            rationale = %result.safety_decision.rationale,
            "result escalated for professional review"
        );
    }

    let explanation = explain.then(|| explain_with_fallback(&RuleBasedExplainer, &result));
    let out = AnalyzeOutput {
        envelope: ResultEncoder::encode(&result),
        explanation,
    };

    let to_stdout = output.to_string_lossy() == "-";
    let pretty = pretty || (to_stdout && atty::is(atty::Stream::Stdout));
    let mut data = if pretty {
        serde_json::to_string_pretty(&out)?
    } else {
        serde_json::to_string(&out)?
    };
    data.push('\n');

    if to_stdout {
        print!("{}", data);
    } else {
        fs::write(output, data)?;
    }
    Ok(())
}

fn cmd_validate(input: &Path, config: Option<&Path>, json: bool) -> Result<(), MediguardCliError> {
    let config = load_config(config)?;
    let input_data = read_input(input)?;

    let report = match Snapshot::from_json(&input_data) {
        Ok(snapshot) => {
            let error = snapshot.validate(&config).err().map(|e| e.to_string());
            let metrics: std::collections::BTreeSet<&str> = snapshot
                .samples
                .iter()
                .flat_map(|s| s.metrics.keys().map(String::as_str))
                .collect();
            ValidationReport {
                valid: error.is_none(),
                user_id: Some(snapshot.user_id.clone()),
                samples: snapshot.samples.len(),
                metrics: metrics.into_iter().map(str::to_string).collect(),
                baseline_ready: snapshot.stored_baseline.is_some()
                    || snapshot.samples.len() >= config.baseline_min_samples,
                error,
            }
        }
        Err(e) => ValidationReport {
            valid: false,
            user_id: None,
            samples: 0,
            metrics: Vec::new(),
            baseline_ready: false,
            error: Some(e.to_string()),
        },
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("User:           {}", report.user_id.as_deref().unwrap_or("unknown"));
        println!("Samples:        {}", report.samples);
        println!("Metrics:        {}", report.metrics.join(", "));
        println!(
            "Baseline ready: {}",
            if report.baseline_ready { "yes" } else { "no" }
        );
        match &report.error {
            Some(error) => println!("\nError: {}", error),
            None => println!("\nSnapshot is valid"),
        }
    }

    match report.error {
        Some(error) => Err(MediguardCliError::ValidationFailed(error)),
        None => Ok(()),
    }
}

fn cmd_doctor(config: Option<&Path>, json: bool) -> Result<(), MediguardCliError> {
    let mut checks: Vec<DoctorCheck> = vec![
        DoctorCheck {
            name: "version".to_string(),
            status: CheckStatus::Ok,
            message: format!("MediGuard Drift version {}", MEDIGUARD_VERSION),
        },
        DoctorCheck {
            name: "schema_version".to_string(),
            status: CheckStatus::Ok,
            message: format!("Input: {}, output: {}", SCHEMA_VERSION, RESULT_SCHEMA_VERSION),
        },
    ];

    checks.push(match config {
        Some(path) if !path.exists() => DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Warning,
            message: "Config file does not exist".to_string(),
        },
        Some(path) => match load_config(Some(path)) {
            Ok(config) => DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "Config valid (baseline after {} checks, trend window {})",
                    config.baseline_min_samples, config.trend_window
                ),
            },
            Err(e) => DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: CliError::from(e).message,
            },
        },
        None => DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Ok,
            message: "Using default configuration".to_string(),
        },
    });

    checks.push(DoctorCheck {
        name: "parallel".to_string(),
        status: CheckStatus::Ok,
        message: if cfg!(feature = "parallel") {
            "Batch analysis runs on a rayon pool".to_string()
        } else {
            "Batch analysis runs sequentially".to_string()
        },
    });

    checks.push(DoctorCheck {
        name: "stdin".to_string(),
        status: CheckStatus::Ok,
        message: if atty::is(atty::Stream::Stdin) {
            "stdin is a TTY (pass -i <file>)".to_string()
        } else {
            "stdin is a pipe (-i - ready)".to_string()
        },
    });

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: MEDIGUARD_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("MediGuard Doctor Report");
        println!("=======================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");
        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    if report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error))
    {
        Err(MediguardCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn cmd_schema(schema_type: SchemaType) -> Result<(), MediguardCliError> {
    match schema_type {
        SchemaType::Input => println!("{}", input_json_schema()),
        SchemaType::Output => {
            println!("Output Schema: {}", RESULT_SCHEMA_VERSION);
            println!();
            println!("- schema_version, producer: {{ name, version }}");
            println!("- result:");
            println!("  - run_id: deterministic UUID of (user_id, as_of, sample count)");
            println!("  - status: complete | partial | insufficient-data");
            println!("  - baseline: {{ user_id, computed_at, sample_count, metrics }}");
            println!("  - drift_reports: per metric delta_pct, z_score, trend, severity");
            println!("  - correlations: ranked context factors with hypotheses");
            println!("  - risk_assessment: {{ score, urgency, confidence, contributing }}");
            println!("  - safety_decision: {{ escalate, rationale, red_flags, priority }}");
            println!("  - recommendations: ranked action templates");
            println!("  - markers: non-fatal anomalies");
            println!("  - stages: stage names in execution order");
        }
        SchemaType::Config => println!("{}", PipelineConfig::default().to_json()?),
    }
    Ok(())
}

fn input_json_schema() -> String {
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": SCHEMA_VERSION,
        "description": "A user's check history and current context",
        "type": "object",
        "required": ["user_id", "as_of", "samples"],
        "properties": {
            "schema_version": { "type": "string", "const": SCHEMA_VERSION },
            "user_id": { "type": "string", "minLength": 1 },
            "as_of": { "type": "string", "format": "date-time" },
            "samples": {
                "type": "array",
                "description": "Ascending by timestamp",
                "items": {
                    "type": "object",
                    "required": ["user_id", "activity_type", "timestamp", "metrics"],
                    "properties": {
                        "user_id": { "type": "string" },
                        "activity_type": {
                            "type": "string",
                            "description": "sit_to_stand, short_walk, steady_hands or a custom name"
                        },
                        "timestamp": { "type": "string", "format": "date-time" },
                        "metrics": {
                            "type": "object",
                            "additionalProperties": { "type": "number", "minimum": 0, "maximum": 1 }
                        }
                    }
                }
            },
            "context": {
                "type": "object",
                "properties": {
                    "sleep_hours": { "type": "number", "minimum": 0, "maximum": 24 },
                    "stress_level": { "type": "string", "enum": ["low", "medium", "high"] },
                    "workload": { "type": "string", "enum": ["light", "moderate", "heavy"] },
                    "activity_level": {
                        "type": "string",
                        "enum": ["sedentary", "lightly_active", "moderately_active", "very_active"]
                    },
                    "notes": { "type": "string" },
                    "medical_summary": { "type": "string" },
                    "known_conditions": { "type": "string" },
                    "reported_symptoms": { "type": "array", "items": { "type": "string" } }
                }
            },
            "stored_baseline": { "type": "object" },
            "rebaseline": { "type": "boolean" }
        }
    })
    .to_string()
}

// Error types

#[derive(Debug)]
enum MediguardCliError {
    Io(io::Error),
    Input(InputValidationError),
    Json(serde_json::Error),
    ValidationFailed(String),
    DoctorFailed,
}

impl From<io::Error> for MediguardCliError {
    fn from(e: io::Error) -> Self {
        MediguardCliError::Io(e)
    }
}

impl From<InputValidationError> for MediguardCliError {
    fn from(e: InputValidationError) -> Self {
        MediguardCliError::Input(e)
    }
}

impl From<serde_json::Error> for MediguardCliError {
    fn from(e: serde_json::Error) -> Self {
        MediguardCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<MediguardCliError> for CliError {
    fn from(e: MediguardCliError) -> Self {
        match e {
            MediguardCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            MediguardCliError::Input(InputValidationError::InvalidConfig(msg)) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: msg,
                hint: Some("Run 'mediguard schema config' for the defaults".to_string()),
            },
            MediguardCliError::Input(e) => CliError {
                code: "INVALID_INPUT".to_string(),
                message: e.to_string(),
                hint: Some("Run 'mediguard validate' for details".to_string()),
            },
            MediguardCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            MediguardCliError::ValidationFailed(msg) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: msg,
                hint: Some("Fix the snapshot and retry".to_string()),
            },
            MediguardCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    valid: bool,
    user_id: Option<String>,
    samples: usize,
    metrics: Vec<String>,
    baseline_ready: bool,
    error: Option<String>,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
