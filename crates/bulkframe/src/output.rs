use std::io::{IsTerminal, Write};

use bulkframe_stream::{StatsSnapshot, StreamParameters, StreamState};
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

const FRAME_SCHEMA: &str = "https://schemas.3leaps.dev/bulkframe/cli/v1/frame.schema.json";
const SUMMARY_SCHEMA: &str =
    "https://schemas.3leaps.dev/bulkframe/cli/v1/session-summary.schema.json";

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
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

/// One completed frame as handed to the consumer.
pub struct FrameView<'a> {
    pub index: u64,
    pub offset: usize,
    /// Frame bytes in stream order; the second part is empty unless the
    /// frame wrapped around the end of the slot footprint.
    pub parts: [&'a [u8]; 2],
    pub signature_len: usize,
}

impl FrameView<'_> {
    fn size(&self) -> usize {
        self.parts[0].len() + self.parts[1].len()
    }

    fn wrapped(&self) -> bool {
        !self.parts[1].is_empty()
    }

    /// Up to `len` header bytes following the signature, as hex.
    fn header_preview(&self, len: usize) -> String {
        self.parts[0]
            .iter()
            .chain(self.parts[1])
            .skip(self.signature_len)
            .take(len)
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

#[derive(Serialize)]
struct FrameOutput {
    schema_id: &'static str,
    index: u64,
    offset: usize,
    size: usize,
    wrapped: bool,
    header: String,
}

pub fn print_frame(frame: &FrameView<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = FrameOutput {
                schema_id: FRAME_SCHEMA,
                index: frame.index,
                offset: frame.offset,
                size: frame.size(),
                wrapped: frame.wrapped(),
                header: frame.header_preview(16),
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
                .set_header(vec!["FRAME", "OFFSET", "SIZE", "WRAPPED", "HEADER"])
                .add_row(vec![
                    frame.index.to_string(),
                    frame.offset.to_string(),
                    frame.size().to_string(),
                    frame.wrapped().to_string(),
                    frame.header_preview(16),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "frame={} offset={} size={}{} header={}",
                frame.index,
                frame.offset,
                frame.size(),
                if frame.wrapped() { " (wrapped)" } else { "" },
                frame.header_preview(16)
            );
        }
        OutputFormat::Raw => {
            print_raw(&frame.parts);
        }
    }
}

pub fn print_raw(parts: &[&[u8]]) {
    let mut out = std::io::stdout().lock();
    for part in parts {
        let _ = out.write_all(part);
    }
    let _ = out.flush();
}

/// End-of-session report.
#[derive(Serialize)]
pub struct SessionSummary {
    pub schema_id: &'static str,
    pub source: String,
    pub frames_delivered: u64,
    pub state: StreamState,
    pub params: StreamParameters,
    pub stats: StatsSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl SessionSummary {
    pub fn new(
        source: impl Into<String>,
        frames_delivered: u64,
        state: StreamState,
        params: StreamParameters,
        stats: StatsSnapshot,
        failure: Option<String>,
    ) -> Self {
        Self {
            schema_id: SUMMARY_SCHEMA,
            source: source.into(),
            frames_delivered,
            state,
            params,
            stats,
            failure,
        }
    }
}

pub fn print_summary(summary: &SessionSummary, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(summary).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let stats = &summary.stats;
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["METRIC", "VALUE"]);
            for (name, value) in [
                ("source", summary.source.clone()),
                ("frames delivered", summary.frames_delivered.to_string()),
                ("frames completed", stats.frames_completed.to_string()),
                ("frames truncated", stats.frames_truncated.to_string()),
                ("completions evicted", stats.completions_evicted.to_string()),
                ("chunks scanned", stats.chunks_scanned.to_string()),
                ("bytes received", stats.bytes_received.to_string()),
                ("operations re-armed", stats.operations_rearmed.to_string()),
                ("operation failures", stats.operation_failures.to_string()),
            ] {
                table.add_row(vec![name.to_string(), value]);
            }
            if let Some(failure) = &summary.failure {
                table.add_row(vec!["session failure".to_string(), failure.clone()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let stats = &summary.stats;
            println!("Session Summary:");
            println!("  Source:              {}", summary.source);
            println!("  Frames delivered:    {}", summary.frames_delivered);
            println!("  Frames completed:    {}", stats.frames_completed);
            println!("  Frames truncated:    {}", stats.frames_truncated);
            println!("  Completions evicted: {}", stats.completions_evicted);
            println!("  Bytes received:      {}", stats.bytes_received);
            if let Some(failure) = &summary.failure {
                println!("  Session failure:     {failure}");
            }
        }
        OutputFormat::Raw => {
            // stdout carries frame bytes; keep the summary out of it.
            eprintln!(
                "frames_delivered={} frames_completed={} frames_truncated={}",
                summary.frames_delivered,
                summary.stats.frames_completed,
                summary.stats.frames_truncated
            );
        }
    }
}
