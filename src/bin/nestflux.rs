//! nestflux CLI - Command-line interface for the nest survey pipeline
//!
//! Commands:
//! - sessions: Run the full pipeline and write every table to a directory
//! - stats: Recompute statistics from an existing session table
//! - periods: Period aggregation over raw scans
//! - validate: Check the raw table schema and report dropped rows
//! - doctor: Diagnose configuration and environment
//! - schema: Print the input column contract

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

use nestflux::config::DateRange;
use nestflux::schema::{parse_array, parse_ndjson, RawRow, ScanLoader, SCHEMA_VERSION};
use nestflux::table::{role_interval_record, role_stats_record, stats_summary_record};
use nestflux::types::Role;
use nestflux::{
    format_records, periods_from_rows, stats_from_session_table, ComputeError, OutputFormat,
    PeriodConfig, PeriodWidth, Record, SexFilterScope, SurveyConfig, SurveyProcessor,
    NESTFLUX_VERSION, PRODUCER_NAME,
};

/// nestflux - Session and rate statistics for nest survey scans
#[derive(Parser)]
#[command(name = "nestflux")]
#[command(author = "FRNBES Field Team")]
#[command(version = NESTFLUX_VERSION)]
#[command(about = "Turn raw nest survey scans into effort-corrected statistics", long_about = None)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Survey configuration (JSON); unset fields keep their defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline and write every table into a directory
    Sessions {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Directory receiving the output tables
        #[arg(short, long)]
        out_dir: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        /// Keep only scans within "YYYY-MM-DD to YYYY-MM-DD"
        #[arg(long)]
        date_range: Option<String>,

        /// Keep only these entities (repeatable)
        #[arg(long = "entity")]
        entities: Vec<String>,

        /// Emit biweek windows that hold no session
        #[arg(long)]
        include_empty_windows: bool,
    },

    /// Recompute statistics from an existing session table
    Stats {
        /// Session table path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        /// Which statistics table to emit
        #[arg(long, value_enum, default_value = "summary")]
        table: StatsTable,
    },

    /// Aggregate indicator columns into period bins
    Periods {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        /// Bin width: 1D, 1W, 2W or 4W
        #[arg(long, default_value = "2W")]
        period: String,

        /// Indicator to aggregate (repeatable; default is every indicator)
        #[arg(long = "metric")]
        metrics: Vec<String>,

        /// Add <metric>_percent columns
        #[arg(long)]
        percent: bool,

        /// Minimum (female + male) / all-roles ratio
        #[arg(long, default_value = "0.9")]
        min_valid_sex_ratio: f64,

        /// Where the sex-data ratio is evaluated
        #[arg(long, value_enum, default_value = "date")]
        sex_filter_scope: ScopeArg,
    },

    /// Check the raw table schema and report dropped rows
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration and environment
    Doctor {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the input column contract
    Schema {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one scan per line)
    Ndjson,
    /// JSON array of scans
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum StatsTable {
    /// Whole-table totals, rates and intervals
    Summary,
    /// Per-role totals and rates
    ByRole,
    /// Per-role confidence intervals
    Cis,
}

#[derive(Clone, Copy, ValueEnum)]
enum ScopeArg {
    Date,
    Period,
}

impl From<ScopeArg> for SexFilterScope {
    fn from(scope: ScopeArg) -> Self {
        match scope {
            ScopeArg::Date => SexFilterScope::Date,
            ScopeArg::Period => SexFilterScope::Period,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

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

fn run(cli: Cli) -> Result<(), NestCliError> {
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Sessions {
            input,
            out_dir,
            input_format,
            output_format,
            date_range,
            entities,
            include_empty_windows,
        } => {
            let mut config = load_config(config_path)?;
            if let Some(range) = date_range {
                config.date_range = Some(range.parse::<DateRange>()?);
            }
            if !entities.is_empty() {
                config.entities = entities;
            }
            config.include_empty_windows |= include_empty_windows;
            cmd_sessions(&input, &out_dir, input_format, output_format, config)
        }
        Commands::Stats {
            input,
            output,
            input_format,
            output_format,
            table,
        } => {
            let config = load_config(config_path)?;
            cmd_stats(&input, &output, input_format, output_format, table, &config)
        }
        Commands::Periods {
            input,
            output,
            input_format,
            output_format,
            period,
            metrics,
            percent,
            min_valid_sex_ratio,
            sex_filter_scope,
        } => {
            let config = load_config(config_path)?;
            let periods = PeriodConfig {
                width: period.parse::<PeriodWidth>()?,
                metrics,
                normalize: percent,
                min_valid_sex_ratio,
                sex_filter_scope: sex_filter_scope.into(),
                ..PeriodConfig::default()
            };
            cmd_periods(&input, &output, input_format, output_format, &config, &periods)
        }
        Commands::Validate {
            input,
            input_format,
            json,
        } => {
            let config = load_config(config_path)?;
            cmd_validate(&input, input_format, json, &config)
        }
        Commands::Doctor { json } => cmd_doctor(config_path, json),
        Commands::Schema { json } => {
            let config = load_config(config_path)?;
            cmd_schema(&config, json)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<SurveyConfig, NestCliError> {
    match path {
        Some(path) => {
            let json = fs::read_to_string(path)?;
            debug!(path = %path.display(), "loading survey configuration");
            Ok(SurveyConfig::from_json(&json)?)
        }
        None => Ok(SurveyConfig::default()),
    }
}

fn read_input(input: &Path) -> Result<String, NestCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn read_rows(input: &Path, format: InputFormat) -> Result<Vec<RawRow>, NestCliError> {
    let data = read_input(input)?;
    let rows = match format {
        InputFormat::Ndjson => parse_ndjson(&data)?,
        InputFormat::Json => parse_array(&data)?,
    };
    if rows.is_empty() {
        return Err(NestCliError::NoRows);
    }
    Ok(rows)
}

fn write_output(output: &Path, data: &str) -> Result<(), NestCliError> {
    if output.to_string_lossy() == "-" {
        print!("{}", data);
    } else {
        fs::write(output, data)?;
    }
    Ok(())
}

fn cmd_sessions(
    input: &Path,
    out_dir: &Path,
    input_format: InputFormat,
    output_format: OutputFormat,
    config: SurveyConfig,
) -> Result<(), NestCliError> {
    let rows = read_rows(input, input_format)?;
    let output = SurveyProcessor::new(config)?.process(&rows)?;

    // Render everything before touching the filesystem
    let ext = output_format.extension();
    let files: Vec<(String, String)> = vec![
        (
            format!("sessions.{}", ext),
            format_records(&output.session_table(), output_format)?,
        ),
        (
            format!("biweekly.{}", ext),
            format_records(&output.biweekly_table(), output_format)?,
        ),
        (
            format!("stats_summary.{}", ext),
            format_records(&output.stats_summary_table(), output_format)?,
        ),
        (
            format!("stats_by_role.{}", ext),
            format_records(&output.stats_by_role_table(), output_format)?,
        ),
        (
            format!("stats_cis.{}", ext),
            format_records(&output.stats_ci_table(), output_format)?,
        ),
        ("qc.json".to_string(), serde_json::to_string_pretty(&output.qc)?),
        (
            "manifest.json".to_string(),
            serde_json::to_string_pretty(&output.manifest)?,
        ),
    ];

    write_tables(out_dir, &files, &output.manifest.run_id)?;

    info!(
        dir = %out_dir.display(),
        files = files.len(),
        run_id = %output.manifest.run_id,
        "tables written"
    );
    Ok(())
}

/// Stage every file in a sibling directory, then move them into `out_dir`.
///
/// A failure while staging removes the staging directory and leaves `out_dir`
/// untouched.
fn write_tables(
    out_dir: &Path,
    files: &[(String, String)],
    run_id: &str,
) -> Result<(), NestCliError> {
    let parent = match out_dir.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;

    let dir_name = out_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "nestflux-out".to_string());
    let staging = parent.join(format!(".{}.staging-{}", dir_name, run_id));

    let staged = fs::create_dir(&staging).and_then(|()| {
        for (name, contents) in files {
            fs::write(staging.join(name), contents)?;
        }
        Ok(())
    });
    if let Err(e) = staged {
        let _ = fs::remove_dir_all(&staging);
        return Err(e.into());
    }

    if out_dir.exists() {
        for (name, _) in files {
            fs::rename(staging.join(name), out_dir.join(name))?;
        }
        fs::remove_dir(&staging)?;
    } else {
        fs::rename(&staging, out_dir)?;
    }
    debug!(staging = %staging.display(), "staged tables moved into place");
    Ok(())
}

fn cmd_stats(
    input: &Path,
    output: &Path,
    input_format: InputFormat,
    output_format: OutputFormat,
    table: StatsTable,
    config: &SurveyConfig,
) -> Result<(), NestCliError> {
    let data = read_input(input)?;
    let records: Vec<Record> = match input_format {
        InputFormat::Ndjson => parse_ndjson(&data)?,
        InputFormat::Json => parse_array(&data)?,
    };

    let stats = stats_from_session_table(&records, &config.roles)?;
    let rendered: Vec<Record> = match table {
        StatsTable::Summary => vec![stats_summary_record(&stats.summary)],
        StatsTable::ByRole => stats.by_role.iter().map(role_stats_record).collect(),
        StatsTable::Cis => stats.intervals.iter().map(role_interval_record).collect(),
    };

    write_output(output, &format_records(&rendered, output_format)?)
}

fn cmd_periods(
    input: &Path,
    output: &Path,
    input_format: InputFormat,
    output_format: OutputFormat,
    config: &SurveyConfig,
    periods: &PeriodConfig,
) -> Result<(), NestCliError> {
    let rows = read_rows(input, input_format)?;
    let result = periods_from_rows(&rows, config, periods)?;

    let records: Vec<Record> = result
        .bins
        .iter()
        .map(nestflux::table::period_record)
        .collect();
    write_output(output, &format_records(&records, output_format)?)
}

fn cmd_validate(
    input: &Path,
    input_format: InputFormat,
    json: bool,
    config: &SurveyConfig,
) -> Result<(), NestCliError> {
    let rows = read_rows(input, input_format)?;

    let (schema_error, load_report) = match ScanLoader::load(&rows, config) {
        Ok(loaded) => (None, Some(loaded.report)),
        Err(e @ ComputeError::Schema { .. }) => (Some(e.to_string()), None),
        Err(e) => return Err(e.into()),
    };

    let report = ValidationReport {
        schema_version: SCHEMA_VERSION.to_string(),
        total_rows: rows.len(),
        schema_error,
        load: load_report,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total rows:     {}", report.total_rows);
        match (&report.schema_error, &report.load) {
            (Some(err), _) => println!("Schema:         FAILED ({})", err),
            (None, Some(load)) => {
                println!("Schema:         OK");
                println!("Dropped rows:   {}", load.dropped_rows);
                println!("Filtered rows:  {}", load.filtered_rows);
                println!("Usable rows:    {}", load.loaded_rows);
                if !load.missing_role_columns.is_empty() {
                    println!(
                        "\nRole columns absent: {}",
                        load.missing_role_columns.join(", ")
                    );
                }
            }
            (None, None) => {}
        }
    }

    match report.schema_error {
        Some(_) => Err(NestCliError::ValidationFailed),
        None => Ok(()),
    }
}

fn cmd_doctor(config_path: Option<&Path>, json: bool) -> Result<(), NestCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "nestflux_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("nestflux version {}", NESTFLUX_VERSION),
    });

    checks.push(DoctorCheck {
        name: "schema_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Input schema: {}", SCHEMA_VERSION),
    });

    if let Some(path) = config_path {
        let check = if !path.exists() {
            DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Warning,
                message: "Config file does not exist".to_string(),
            }
        } else {
            match fs::read_to_string(path) {
                Ok(content) => match SurveyConfig::from_json(&content) {
                    Ok(config) => DoctorCheck {
                        name: "config".to_string(),
                        status: CheckStatus::Ok,
                        message: format!(
                            "Config valid (release {}, {} roles, gap {}s)",
                            config.config_release_id,
                            config.roles.len(),
                            config.session_gap_seconds
                        ),
                    },
                    Err(e) => DoctorCheck {
                        name: "config".to_string(),
                        status: CheckStatus::Error,
                        message: format!("Invalid config: {}", e),
                    },
                },
                Err(e) => DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Cannot read config file: {}", e),
                },
            }
        };
        checks.push(check);
    }

    let stdin_message = if atty::is(atty::Stream::Stdin) {
        "stdin is a TTY (pass --input FILE)"
    } else {
        "stdin is a pipe (--input - ready)"
    };
    checks.push(DoctorCheck {
        name: "stdin".to_string(),
        status: CheckStatus::Ok,
        message: stdin_message.to_string(),
    });

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: NESTFLUX_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("nestflux Doctor Report");
        println!("======================");
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
        Err(NestCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn cmd_schema(config: &SurveyConfig, json: bool) -> Result<(), NestCliError> {
    let columns = &config.columns;
    let role_columns: Vec<serde_json::Value> = Role::ALL
        .iter()
        .map(|role| {
            serde_json::json!({
                "role": role.as_str(),
                "location": columns.location(*role),
                "behavior": columns.behavior(*role),
            })
        })
        .collect();

    if json {
        let schema = serde_json::json!({
            "schema_version": SCHEMA_VERSION,
            "required": [columns.timestamp, columns.counter],
            "entity": columns.entity,
            "roles": role_columns,
            "excluded_columns": columns.excluded_columns,
            "excluded_substrings": columns.excluded_substrings,
        });
        println!("{}", serde_json::to_string_pretty(&schema)?);
        return Ok(());
    }

    println!("Input Schema: {}", SCHEMA_VERSION);
    println!();
    println!("One JSON object per scan.");
    println!();
    println!("Required:");
    println!("  {:<16} observation time (YYYY-MM-DD HH:MM[:SS] or RFC 3339)", columns.timestamp);
    println!("  {:<16} manual minutes counter (numeric)", columns.counter);
    println!();
    println!("Optional:");
    println!("  {:<16} entity / nest key", columns.entity);
    for role in Role::ALL {
        println!(
            "  {:<16} {} location code (1-7 nest area, 7 nest tree)",
            columns.location(role),
            role
        );
        println!(
            "  {:<16} {} behavior code (D = nest building)",
            columns.behavior(role),
            role
        );
    }
    println!();
    println!("Any other numeric column is an indicator for period aggregation,");
    println!("except: {}", columns.excluded_columns.join(", "));
    println!(
        "and columns containing: {}",
        columns.excluded_substrings.join(", ")
    );
    Ok(())
}

// Error types

#[derive(Debug)]
enum NestCliError {
    Io(io::Error),
    Compute(ComputeError),
    Json(serde_json::Error),
    NoRows,
    ValidationFailed,
    DoctorFailed,
}

impl From<io::Error> for NestCliError {
    fn from(e: io::Error) -> Self {
        NestCliError::Io(e)
    }
}

impl From<ComputeError> for NestCliError {
    fn from(e: ComputeError) -> Self {
        NestCliError::Compute(e)
    }
}

impl From<serde_json::Error> for NestCliError {
    fn from(e: serde_json::Error) -> Self {
        NestCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<NestCliError> for CliError {
    fn from(e: NestCliError) -> Self {
        match e {
            NestCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            NestCliError::Compute(e) => {
                let (code, hint) = match &e {
                    ComputeError::Schema { .. } => {
                        ("SCHEMA_ERROR", "Run 'nestflux schema' for the column contract")
                    }
                    ComputeError::ParseError(_) | ComputeError::JsonError(_) => {
                        ("PARSE_ERROR", "Check input format")
                    }
                    ComputeError::InvalidConfig(_) => {
                        ("CONFIG_ERROR", "Run 'nestflux doctor --config FILE'")
                    }
                    ComputeError::UnknownMetric(_) => {
                        ("UNKNOWN_METRIC", "Run 'nestflux schema' to list indicator rules")
                    }
                    ComputeError::InvariantViolation(_) => {
                        ("INTERNAL_ERROR", "Please report this with the input that triggered it")
                    }
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            NestCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            NestCliError::NoRows => CliError {
                code: "NO_ROWS".to_string(),
                message: "No rows found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            NestCliError::ValidationFailed => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: "Input is missing required columns".to_string(),
                hint: Some("Fix the column names or pass --config with a column mapping".to_string()),
            },
            NestCliError::DoctorFailed => CliError {
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
    schema_version: String,
    total_rows: usize,
    schema_error: Option<String>,
    load: Option<nestflux::schema::LoadReport>,
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
