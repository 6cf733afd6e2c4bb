use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tracing::info;
use tracing_subscriber::EnvFilter;

use interview_engine::core::events::ToolDef;
use interview_engine::core::transport::loopback::{
    LoopbackMicrophone, LoopbackPeerFactory, LoopbackSignaling, StaticCredentialIssuer,
};
use interview_engine::{
    ChannelEvent, EngineConfig, InterviewKind, InterviewProfile, InterviewSession, RecordSchema,
    TransportNegotiator,
};

const REPLAY_TOOL_NAME: &str = "submit_record";

/// Interview engine - realtime voice interview sessions
#[derive(Parser, Debug)]
#[command(name = "interview-engine")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Screen a piece of text with the configured safety monitor
    CheckSafety {
        /// Text to screen
        text: String,
    },

    /// Validate a tool payload against a tool definition
    Extract {
        /// Tool definition (JSON: a function tool or a bare parameters schema)
        #[arg(short = 's', long = "schema", value_name = "FILE")]
        schema: PathBuf,

        /// Tool arguments payload (JSON)
        payload: PathBuf,
    },

    /// Replay a recorded event stream through a full session
    Replay {
        /// Recorded data-channel messages, one JSON object per line
        events: PathBuf,

        /// Tool definition used to validate the record
        #[arg(short = 's', long = "schema", value_name = "FILE")]
        schema: Option<PathBuf>,

        /// Interview type
        #[arg(long = "interview-type", default_value = "clinical_history")]
        interview_type: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            EngineConfig::from_file(path)?
        }
        None => EngineConfig::from_env()?,
    };

    match cli.command {
        Commands::CheckSafety { text } => check_safety(&config, &text),
        Commands::Extract { schema, payload } => extract(&schema, &payload),
        Commands::Replay {
            events,
            schema,
            interview_type,
        } => replay(&config, &events, schema.as_deref(), &interview_type).await,
    }
}

fn check_safety(config: &EngineConfig, text: &str) -> anyhow::Result<()> {
    let monitor = config.safety_monitor();
    let matched = monitor.find_match(text);
    let result = json!({
        "crisis": matched.is_some(),
        "matched_phrase": matched,
    });
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn extract(schema_path: &Path, payload_path: &Path) -> anyhow::Result<()> {
    let tool = load_tool(schema_path)?;
    let schema = tool
        .parameters
        .as_ref()
        .map(RecordSchema::from_tool_parameters)
        .unwrap_or_default();

    let payload = std::fs::read_to_string(payload_path)
        .with_context(|| format!("Failed to read payload {}", payload_path.display()))?;

    let record = schema
        .extract(&payload)
        .map_err(|e| anyhow!("Malformed tool payload: {e}"))?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

async fn replay(
    config: &EngineConfig,
    events_path: &Path,
    schema_path: Option<&Path>,
    interview_type: &str,
) -> anyhow::Result<()> {
    let recording = std::fs::read_to_string(events_path)
        .with_context(|| format!("Failed to read events {}", events_path.display()))?;
    let lines: Vec<String> = recording
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();

    let tool = match schema_path {
        Some(path) => load_tool(path)?,
        None => ToolDef::function(
            REPLAY_TOOL_NAME,
            Some("Submit the interview record".to_string()),
            json!({"type": "object", "properties": {}}),
        ),
    };

    let kind = match interview_type {
        "clinical_history" => InterviewKind::ClinicalHistory,
        "patient_intake" => InterviewKind::PatientIntake,
        other => return Err(anyhow!("Unknown interview type: {other}")),
    };

    let profile = config
        .apply_to_profile(
            InterviewProfile::builder(kind)
                .instructions("Replay of a recorded interview session.")
                .tool_def(tool),
        )
        .build()?;

    let (peers, mut remotes) = LoopbackPeerFactory::new();
    let negotiator = TransportNegotiator::new(
        Arc::new(StaticCredentialIssuer::new("replay")),
        Arc::new(LoopbackSignaling),
        Arc::new(LoopbackMicrophone::new()),
        Arc::new(peers),
    );

    let mut session = InterviewSession::new(profile, negotiator);
    session.start().await?;

    let remote = remotes
        .recv()
        .await
        .ok_or_else(|| anyhow!("Loopback transport did not open a data channel"))?;

    info!(messages = lines.len(), "Replaying recorded session");
    let feeder = tokio::spawn(async move {
        let mut sent = 0usize;
        if remote.events.send(ChannelEvent::Open).await.is_ok() {
            for line in lines {
                if !remote.send_message(line).await {
                    break;
                }
                sent += 1;
            }
            let _ = remote.events.send(ChannelEvent::Closed).await;
        }
        (remote, sent)
    });

    let report = session.run().await?;
    let (_remote, sent) = feeder.await?;
    info!(sent, status = %report.status, "Replay finished");

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Load a tool definition, accepting either a full function tool or just
/// its parameters schema.
fn load_tool(path: &Path) -> anyhow::Result<ToolDef> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read tool definition {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse tool definition {}", path.display()))?;

    if let Some(name) = value.get("name").and_then(Value::as_str) {
        return Ok(ToolDef {
            tool_type: "function".to_string(),
            name: name.to_string(),
            description: value
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
            parameters: value.get("parameters").cloned(),
        });
    }

    Ok(ToolDef::function(REPLAY_TOOL_NAME, None, value))
}
