use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use tascomm_endpoint::{GameDataType, PlaybackSnapshot, TasStates};

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct SnapshotOutput<'a> {
    event: &'static str,
    #[serde(flatten)]
    snapshot: &'a PlaybackSnapshot,
    states: String,
    timestamp: String,
}

#[derive(Serialize)]
struct QueryOutput<'a> {
    event: &'static str,
    kind: &'static str,
    argument: &'a serde_json::Value,
    result: &'a str,
    timestamp: String,
}

pub fn print_snapshot(snapshot: &PlaybackSnapshot, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = SnapshotOutput {
                event: "state",
                snapshot,
                states: states_label(snapshot.tas_states),
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["LEVEL", "FRAME", "LINE", "STATES", "TIME"])
                .add_row(vec![
                    snapshot.level_name.clone(),
                    format!(
                        "{}/{}",
                        snapshot.current_frame_in_tas, snapshot.total_frames
                    ),
                    line_label(snapshot),
                    states_label(snapshot.tas_states),
                    snapshot.chapter_time.clone(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "level={} frame={}/{} line={} states={} time={}",
                snapshot.level_name,
                snapshot.current_frame_in_tas,
                snapshot.total_frames,
                line_label(snapshot),
                states_label(snapshot.tas_states),
                snapshot.chapter_time
            );
        }
    }
}

pub fn print_query_result(
    kind: GameDataType,
    argument: &serde_json::Value,
    result: &str,
    format: OutputFormat,
) {
    match format {
        OutputFormat::Json => {
            let out = QueryOutput {
                event: "query",
                kind: kind.name(),
                argument,
                result,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["QUERY", "ARGUMENT", "RESULT"])
                .add_row(vec![kind.name().to_string(), argument.to_string(), result.to_string()]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("query={} argument={} result={}", kind, argument, result);
        }
    }
}

/// `12` or `12 (3)` when the line has a progress suffix.
fn line_label(snapshot: &PlaybackSnapshot) -> String {
    if snapshot.current_line_suffix.is_empty() {
        snapshot.current_line.to_string()
    } else {
        format!(
            "{} ({})",
            snapshot.current_line, snapshot.current_line_suffix
        )
    }
}

fn states_label(states: TasStates) -> String {
    if states.is_empty() {
        return "-".to_string();
    }
    let names: Vec<&str> = states.iter_names().map(|(name, _)| name).collect();
    names.join("|")
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
