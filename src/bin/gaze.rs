//! Gaze CLI - Command-line interface for Synheart Gaze
//!
//! Commands:
//! - run: Drive a session from input events, printing per-frame outcomes
//! - validate: Validate input event schema
//! - doctor: Diagnose configuration and calibration profile health
//! - schema: Describe the input and export schemas

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use synheart_gaze::encoder::{encode_ndjson, SessionExporter, EXPORT_VERSION};
use synheart_gaze::schema::{InputEvent, InputEventAdapter, SCHEMA_VERSION};
use synheart_gaze::{CalibrationProfile, GazeConfig, GazeError, GazeSession};
use synheart_gaze::{GAZE_VERSION, PRODUCER_NAME};

/// Gaze - On-device gaze and head direction classification
#[derive(Parser)]
#[command(name = "gaze")]
#[command(author = "Synheart AI Inc")]
#[command(version = GAZE_VERSION)]
#[command(about = "Classify gaze direction from facial landmark streams", long_about = None)]
struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive a session from input events (NDJSON, one event per line)
    Run {
        /// Input file path (use - for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,

        /// Session configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Load a calibration profile before processing
        #[arg(long)]
        load_profile: Option<PathBuf>,

        /// Save the active calibration profile on exit
        #[arg(long)]
        save_profile: Option<PathBuf>,

        /// Write a session export on exit
        #[arg(long)]
        export: Option<PathBuf>,

        /// Export format
        #[arg(long, default_value = "json")]
        export_format: ExportFormat,

        /// Flush output after each outcome
        #[arg(long, default_value = "true")]
        flush: bool,
    },

    /// Validate input event schema
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

    /// Diagnose configuration and profile health
    Doctor {
        /// Check a configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Check a calibration profile file
        #[arg(long)]
        profile: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print schema information
    Schema {
        /// Schema to print (input or output)
        #[arg(value_enum)]
        schema_type: SchemaType,

        /// Output as JSON schema
        #[arg(long)]
        json_schema: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one event per line)
    Ndjson,
    /// JSON array of events
    Json,
}

#[derive(Clone, ValueEnum)]
enum ExportFormat {
    /// Single pretty-printed JSON document
    Json,
    /// Header line followed by one record per line
    Ndjson,
}

#[derive(Clone, ValueEnum)]
enum SchemaType {
    /// Input schema (gaze.input_event.v1)
    Input,
    /// Output schema (gaze.session_export.v1)
    Output,
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

/// Logs go to stderr so stdout stays machine-readable
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    fmt().with_env_filter(filter).with_writer(io::stderr).init();
}

fn run(cli: Cli) -> Result<(), GazeCliError> {
    match cli.command {
        Commands::Run {
            input,
            config,
            load_profile,
            save_profile,
            export,
            export_format,
            flush,
        } => cmd_run(
            &input,
            config.as_deref(),
            load_profile.as_deref(),
            save_profile.as_deref(),
            export.as_deref(),
            export_format,
            flush,
        ),

        Commands::Validate {
            input,
            input_format,
            json,
        } => cmd_validate(&input, input_format, json),

        Commands::Doctor {
            config,
            profile,
            json,
        } => cmd_doctor(config.as_deref(), profile.as_deref(), json),

        Commands::Schema {
            schema_type,
            json_schema,
        } => cmd_schema(schema_type, json_schema),
    }
}

fn cmd_run(
    input: &Path,
    config: Option<&Path>,
    load_profile: Option<&Path>,
    save_profile: Option<&Path>,
    export: Option<&Path>,
    export_format: ExportFormat,
    flush: bool,
) -> Result<(), GazeCliError> {
    let config = match config {
        Some(path) => GazeConfig::from_json(&fs::read_to_string(path)?)?,
        None => GazeConfig::default(),
    };
    let mut session = GazeSession::new(config)?;
    let exporter = SessionExporter::new();

    if let Some(path) = load_profile {
        let epoch = session.load_profile(&fs::read_to_string(path)?)?;
        info!(path = %path.display(), epoch, "profile loaded");
    }

    let reader: Box<dyn BufRead> = if is_stdio(input) {
        Box::new(BufReader::new(io::stdin()))
    } else {
        Box::new(BufReader::new(fs::File::open(input)?))
    };

    let mut stdout = io::stdout();
    let mut events = 0usize;

    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();

        if trimmed.is_empty() {
            continue;
        }

        let event: InputEvent = serde_json::from_str(trimmed).map_err(|e| {
            GazeCliError::ParseError(format!("Failed to parse line {}: {}", line_num + 1, e))
        })?;
        events += 1;

        if let Some(outcome) = InputEventAdapter::apply(&mut session, &event)? {
            writeln!(stdout, "{}", serde_json::to_string(&outcome)?)?;
            if flush {
                stdout.flush()?;
            }
        }
    }
    stdout.flush()?;

    if events == 0 {
        return Err(GazeCliError::NoEvents);
    }

    if session.is_calibrating() {
        warn!("input ended during calibration; no profile was produced by this run");
    }

    if let Some(path) = save_profile {
        match session.save_profile() {
            Ok(json) => fs::write(path, json)?,
            Err(GazeError::NoActiveProfile) => {
                warn!(path = %path.display(), "no active profile to save");
            }
            Err(e) => return Err(e.into()),
        }
    }

    if let Some(path) = export {
        let output = match export_format {
            ExportFormat::Json => exporter.encode_to_json(&session)?,
            ExportFormat::Ndjson => encode_ndjson(&exporter.export(&session))?,
        };
        fs::write(path, output)?;
    }

    let summary = session.summary();
    info!(
        frames = summary.total_frames,
        label_changes = summary.label_changes,
        unknown_ratio = summary.unknown_ratio,
        face_detection_rate = summary.face_detection_rate,
        looking_away_episodes = summary.looking_away.len(),
        excessive_blinking = summary.excessive_blinking,
        "session finished"
    );

    Ok(())
}

fn cmd_validate(input: &Path, input_format: InputFormat, json: bool) -> Result<(), GazeCliError> {
    let input_data = read_input(input)?;

    let events = match input_format {
        InputFormat::Ndjson => InputEventAdapter::parse_ndjson(&input_data)?,
        InputFormat::Json => InputEventAdapter::parse_array(&input_data)?,
    };

    let results = InputEventAdapter::validate_events(&events);

    let report = ValidationReport {
        total_events: events.len(),
        valid_events: events.len() - results.len(),
        invalid_events: results.len(),
        errors: results
            .iter()
            .map(|r| ValidationErrorDetail {
                index: r.index,
                event_id: r.event_id.clone(),
                event_type: r.event_type.to_string(),
                error: r.error.to_string(),
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total events:   {}", report.total_events);
        println!("Valid events:   {}", report.valid_events);
        println!("Invalid events: {}", report.invalid_events);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!(
                    "  - {} event {} (index {}): {}",
                    err.event_type,
                    err.event_id.as_deref().unwrap_or("-"),
                    err.index,
                    err.error
                );
            }
        }
    }

    if report.invalid_events > 0 {
        Err(GazeCliError::ValidationFailed(report.invalid_events))
    } else {
        Ok(())
    }
}

fn cmd_doctor(config: Option<&Path>, profile: Option<&Path>, json: bool) -> Result<(), GazeCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck::ok(
        "gaze_version",
        format!("Gaze version {}", GAZE_VERSION),
    ));
    checks.push(DoctorCheck::ok(
        "schema_version",
        format!("Input schema: {}, export schema: {}", SCHEMA_VERSION, EXPORT_VERSION),
    ));

    let mut sensitivity = GazeConfig::default().sensitivity;
    if let Some(path) = config {
        checks.push(match fs::read_to_string(path) {
            Ok(content) => match GazeConfig::from_json(&content) {
                Ok(config) => {
                    sensitivity = config.sensitivity;
                    DoctorCheck::ok(
                        "config",
                        format!(
                            "Configuration valid (debounce {} frames, sensitivity {}, {} samples per pose)",
                            config.debounce_threshold, config.sensitivity, config.samples_per_pose
                        ),
                    )
                }
                Err(e) => DoctorCheck::error("config", format!("Invalid configuration: {}", e)),
            },
            Err(e) => DoctorCheck::error("config", format!("Cannot read configuration file: {}", e)),
        });
    }

    if let Some(path) = profile {
        checks.push(if !path.exists() {
            DoctorCheck::warning("profile", "Profile file does not exist".to_string())
        } else {
            match fs::read_to_string(path) {
                Ok(content) => match CalibrationProfile::from_json(&content) {
                    Ok(profile) => profile_check(&profile, sensitivity),
                    Err(e) => DoctorCheck::error("profile", format!("Invalid profile: {}", e)),
                },
                Err(e) => DoctorCheck::error("profile", format!("Cannot read profile file: {}", e)),
            }
        });
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck::ok("stdin", "stdin is a TTY (interactive mode)".to_string())
    } else {
        DoctorCheck::ok("stdin", "stdin is a pipe (streaming mode ready)".to_string())
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: GAZE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Gaze Doctor Report");
        println!("==================");
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

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(GazeCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

/// Profiles with missing poses still load, but those directions never fire
fn profile_check(profile: &CalibrationProfile, sensitivity: f64) -> DoctorCheck {
    let poses: Vec<String> = profile.poses().map(|p| p.to_string()).collect();
    let message = format!(
        "Profile valid (epoch {}, created {}, poses: {})",
        profile.epoch(),
        profile.created_at().to_rfc3339(),
        poses.join(", ")
    );
    if poses.len() < 5 {
        DoctorCheck::warning("profile", format!("{message}; uncalibrated directions never trigger"))
    } else if (profile.sensitivity() - sensitivity).abs() > f64::EPSILON {
        DoctorCheck::warning(
            "profile",
            format!(
                "{message}; built at sensitivity {} but configuration uses {}",
                profile.sensitivity(),
                sensitivity
            ),
        )
    } else {
        DoctorCheck::ok("profile", message)
    }
}

fn cmd_schema(schema_type: SchemaType, json_schema: bool) -> Result<(), GazeCliError> {
    match schema_type {
        SchemaType::Input => {
            if json_schema {
                println!("{}", get_input_json_schema());
            } else {
                println!("Input Schema: {}", SCHEMA_VERSION);
                println!();
                println!("Every event carries schema_version, timestamp (RFC 3339), optional");
                println!("event_id, and a type:");
                println!();
                println!("1. frame - Landmark detector output");
                println!("   - landmarks: {{ points: [[x, y], ...], image_width, image_height, valid }}");
                println!("   - null or missing landmarks means no face was found");
                println!();
                println!("2. features - Pre-reduced frame, for replaying recorded sessions");
                println!("   - features: {{ horizontal_eye_offset, vertical_eye_offset,");
                println!("                horizontal_face_offset, vertical_face_offset, eyelid_openness }}");
                println!("   - or no_signal: face_absent | blink");
                println!();
                println!("3. start_calibration - Begin calibrating");
                println!("   - sequence: optional list of poses, must include straight");
                println!();
                println!("4. abort_calibration, retake_pose - Calibration control");
                println!();
                println!("Poses: straight, left, right, up, down");
            }
        }
        SchemaType::Output => {
            if json_schema {
                println!("{}", get_output_json_schema());
            } else {
                println!("Output Schema: {}", EXPORT_VERSION);
                println!();
                println!("`gaze run` prints one frame outcome per line:");
                println!("- frame_index, timestamp, phase (live | calibrating)");
                println!("- features or no_signal");
                println!("- classification: {{ label, confidence, timestamp, profile_epoch }}");
                println!("- smoothed_label, calibration progress while calibrating");
                println!();
                println!("Session exports (--export) contain:");
                println!("- export_version, session_id, exported_at");
                println!("- producer: {{ name, version, instance_id }}");
                println!("- config, profile (active calibration profile)");
                println!("- summary: {{ frame counts, label_counts, unknown_ratio, blink and");
                println!("             absence episodes, label_changes, face_detection_rate,");
                println!("             blink_rate_per_minute, excessive_blinking,");
                println!("             looking_away episodes, duration_ms }}");
                println!("- records: one entry per processed frame");
            }
        }
    }

    Ok(())
}

// Helper functions

fn is_stdio(path: &Path) -> bool {
    path.to_string_lossy() == "-"
}

fn read_input(input: &Path) -> Result<String, GazeCliError> {
    if is_stdio(input) {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn get_input_json_schema() -> String {
    serde_json::json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "$id": "https://synheart.ai/schemas/gaze.input_event.v1.json",
        "title": "gaze.input_event.v1",
        "type": "object",
        "required": ["schema_version", "timestamp", "type"],
        "properties": {
            "schema_version": { "const": SCHEMA_VERSION },
            "event_id": { "type": "string" },
            "timestamp": { "type": "string", "format": "date-time" },
            "type": {
                "enum": ["frame", "features", "start_calibration", "abort_calibration", "retake_pose"]
            },
            "landmarks": {
                "type": ["object", "null"],
                "required": ["points", "image_width", "image_height"],
                "properties": {
                    "points": {
                        "type": "array",
                        "items": {
                            "type": "array",
                            "items": { "type": "number" },
                            "minItems": 2,
                            "maxItems": 2
                        }
                    },
                    "image_width": { "type": "number", "exclusiveMinimum": 0 },
                    "image_height": { "type": "number", "exclusiveMinimum": 0 },
                    "valid": { "type": "boolean", "default": true }
                }
            },
            "features": { "$ref": "#/definitions/feature_vector" },
            "no_signal": { "enum": ["face_absent", "blink"] },
            "sequence": {
                "type": "array",
                "items": { "enum": ["straight", "left", "right", "up", "down"] },
                "uniqueItems": true
            }
        },
        "definitions": {
            "feature_vector": {
                "type": "object",
                "required": [
                    "horizontal_eye_offset", "vertical_eye_offset",
                    "horizontal_face_offset", "vertical_face_offset", "eyelid_openness"
                ],
                "properties": {
                    "horizontal_eye_offset": { "type": "number" },
                    "vertical_eye_offset": { "type": "number" },
                    "horizontal_face_offset": { "type": "number" },
                    "vertical_face_offset": { "type": "number" },
                    "eyelid_openness": { "type": "number" }
                }
            }
        }
    })
    .to_string()
}

fn get_output_json_schema() -> String {
    let label = serde_json::json!({
        "enum": ["straight", "left", "right", "up", "down", "unknown"]
    });
    serde_json::json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "$id": "https://synheart.ai/schemas/gaze.session_export.v1.json",
        "title": "gaze.session_export.v1",
        "type": "object",
        "required": ["export_version", "producer", "session_id", "exported_at", "config", "summary", "records"],
        "properties": {
            "export_version": { "const": EXPORT_VERSION },
            "producer": {
                "type": "object",
                "required": ["name", "version", "instance_id"],
                "properties": {
                    "name": { "type": "string" },
                    "version": { "type": "string" },
                    "instance_id": { "type": "string" }
                }
            },
            "session_id": { "type": "string" },
            "exported_at": { "type": "string", "format": "date-time" },
            "config": { "type": "object" },
            "profile": { "type": ["object", "null"] },
            "summary": { "type": "object" },
            "records": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["frame_index", "timestamp", "phase", "raw_label", "smoothed_label", "confidence"],
                    "properties": {
                        "frame_index": { "type": "integer", "minimum": 0 },
                        "timestamp": { "type": "string", "format": "date-time" },
                        "phase": { "enum": ["live", "calibrating"] },
                        "features": { "type": "object" },
                        "no_signal": { "enum": ["face_absent", "blink"] },
                        "raw_label": label,
                        "smoothed_label": label,
                        "confidence": { "type": "number", "minimum": 0, "maximum": 1 },
                        "profile_epoch": { "type": ["integer", "null"] }
                    }
                }
            }
        }
    })
    .to_string()
}

// Error types

#[derive(Debug)]
enum GazeCliError {
    Io(io::Error),
    Gaze(GazeError),
    Json(serde_json::Error),
    NoEvents,
    ValidationFailed(usize),
    DoctorFailed,
    ParseError(String),
}

impl From<io::Error> for GazeCliError {
    fn from(e: io::Error) -> Self {
        GazeCliError::Io(e)
    }
}

impl From<GazeError> for GazeCliError {
    fn from(e: GazeError) -> Self {
        GazeCliError::Gaze(e)
    }
}

impl From<serde_json::Error> for GazeCliError {
    fn from(e: serde_json::Error) -> Self {
        GazeCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<GazeCliError> for CliError {
    fn from(e: GazeCliError) -> Self {
        match e {
            GazeCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            GazeCliError::Gaze(e) => {
                let (code, hint) = match &e {
                    GazeError::InvalidConfiguration(_) => {
                        ("CONFIG_ERROR", "Run 'gaze doctor --config <file>' for details")
                    }
                    GazeError::DegenerateCalibration(_)
                    | GazeError::CalibrationInsufficientData { .. } => {
                        ("CALIBRATION_ERROR", "Recalibrate, holding each pose steadily")
                    }
                    GazeError::InvalidCalibrationSequence(_)
                    | GazeError::CalibrationInProgress
                    | GazeError::NoCalibrationInProgress
                    | GazeError::NoRetakePending => {
                        ("CONTROL_ERROR", "Check the order of calibration control events")
                    }
                    GazeError::NoActiveProfile => {
                        ("NO_PROFILE", "Calibrate or pass --load-profile first")
                    }
                    _ => ("PARSE_ERROR", "Ensure input matches gaze.input_event.v1 schema"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            GazeCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            GazeCliError::NoEvents => CliError {
                code: "NO_EVENTS".to_string(),
                message: "No events found in input".to_string(),
                hint: Some("Ensure input is not empty".to_string()),
            },
            GazeCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} events failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
            GazeCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
            GazeCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Run 'gaze validate' on the input".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    total_events: usize,
    valid_events: usize,
    invalid_events: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    index: usize,
    event_id: Option<String>,
    event_type: String,
    error: String,
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

impl DoctorCheck {
    fn ok(name: &str, message: String) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Ok,
            message,
        }
    }

    fn warning(name: &str, message: String) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Warning,
            message,
        }
    }

    fn error(name: &str, message: String) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Error,
            message,
        }
    }
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
