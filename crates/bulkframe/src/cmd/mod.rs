use std::path::{Path, PathBuf};
use std::time::Duration;

use bulkframe_device::DeviceProfile;
use bulkframe_stream::StreamParameters;
use clap::{Args, Subcommand};
use serde::de::DeserializeOwned;

use crate::exit::{device_error, io_error, CliError, CliResult, DATA_INVALID, USAGE};
use crate::output::OutputFormat;

pub mod capture;
pub mod info;
pub mod session;
pub mod simulate;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show the frame buffer layout a device profile produces.
    Info(InfoArgs),
    /// Reassemble frames from a raw capture file or stdin.
    Capture(CaptureArgs),
    /// Stream frames from the built-in synthetic source.
    Simulate(SimulateArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Info(args) => info::run(args, format),
        Command::Capture(args) => capture::run(args, format),
        Command::Simulate(args) => simulate::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ProfileArgs {
    /// Device profile JSON file. Default: built-in profile.
    #[arg(long, value_name = "FILE", env = "BULKFRAME_PROFILE")]
    pub profile: Option<PathBuf>,
}

impl ProfileArgs {
    pub fn load(&self) -> CliResult<DeviceProfile> {
        match &self.profile {
            Some(path) => load_json(path, "profile"),
            None => Ok(DeviceProfile::default()),
        }
    }
}

#[derive(Args, Debug)]
pub struct StreamArgs {
    #[command(flatten)]
    pub profile: ProfileArgs,
    /// Stream parameters JSON file. Overrides the sizing flags.
    #[arg(long, value_name = "FILE", env = "BULKFRAME_PARAMS")]
    pub params: Option<PathBuf>,
    /// Frame payload size in bytes. Default: the profile maximum.
    #[arg(long, env = "BULKFRAME_FRAME_DATA_SIZE")]
    pub frame_data_size: Option<usize>,
    /// Header-sized chunks per transfer operation.
    #[arg(long, default_value_t = 64, env = "BULKFRAME_CHUNKS_PER_OPERATION")]
    pub chunks_per_operation: usize,
    /// Transfer operations kept in flight.
    #[arg(long, default_value_t = 8, env = "BULKFRAME_OPERATIONS")]
    pub operations: usize,
    /// Exit after N frames.
    #[arg(long)]
    pub count: Option<u64>,
    /// How long to wait for each frame (e.g. 200ms, 2s).
    #[arg(long, default_value = "200ms")]
    pub frame_timeout: String,
}

impl StreamArgs {
    pub fn resolve(&self, profile: &DeviceProfile) -> CliResult<StreamParameters> {
        if let Some(path) = &self.params {
            return load_json(path, "stream parameters");
        }
        profile
            .stream_parameters(
                self.frame_data_size.unwrap_or(profile.max_frame_data_size),
                self.chunks_per_operation,
                self.operations,
            )
            .map_err(|err| device_error("invalid profile", err))
    }
}

#[derive(Args, Debug)]
pub struct InfoArgs {
    #[command(flatten)]
    pub profile: ProfileArgs,
}

#[derive(Args, Debug)]
pub struct CaptureArgs {
    /// Raw capture file, or `-` for stdin.
    pub input: PathBuf,
    #[command(flatten)]
    pub stream: StreamArgs,
    /// Delay before each transfer is filled (e.g. 1ms), to pace fast sources.
    #[arg(long)]
    pub pace: Option<String>,
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub stream: StreamArgs,
    /// Frames to generate before the source runs dry.
    #[arg(long, default_value_t = 32)]
    pub frames: u64,
    /// Cut every N-th frame short.
    #[arg(long, value_name = "N")]
    pub drop_every: Option<u64>,
    /// Filler chunks between frames.
    #[arg(long, default_value_t = 0)]
    pub gap_chunks: usize,
    /// Stall every transfer after N successful ones.
    #[arg(long, value_name = "N")]
    pub fail_after: Option<u64>,
    /// Delay before each transfer completes (e.g. 1ms).
    #[arg(long)]
    pub pace: Option<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

fn load_json<T: DeserializeOwned>(path: &Path, what: &str) -> CliResult<T> {
    let text = std::fs::read_to_string(path)
        .map_err(|err| io_error(&format!("failed to read {what} {}", path.display()), err))?;
    serde_json::from_str(&text).map_err(|err| {
        CliError::new(
            DATA_INVALID,
            format!("invalid {what} {}: {err}", path.display()),
        )
    })
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

pub fn parse_optional_duration(input: Option<&str>) -> CliResult<Option<Duration>> {
    input.map(parse_duration).transpose()
}
