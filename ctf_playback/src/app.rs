use std::{
    fs,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::{
    metadata::{ast, Metadata},
    playback::{MappedFile, PlaybackOptions, StreamPlayback, TracePlayback},
};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "ctf-dump",
    author,
    version,
    about = "Decode CTF event streams and print their events in timestamp order",
    long_about = None
)]
pub struct Args {
    /// Metadata syntax tree, serialized as JSON by the TSDL front end
    #[arg(long, value_name = "PATH")]
    pub metadata_ast: PathBuf,

    /// Binary event stream files of the trace
    #[arg(value_name = "STREAM", required = true)]
    pub streams: Vec<PathBuf>,

    /// Stop after this many events
    #[arg(long)]
    pub limit: Option<usize>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Skip to the next packet when a packet fails to decode
    #[arg(long)]
    pub skip_corrupt_packets: bool,

    /// Accept packets whose magic number or uuid does not match the trace
    #[arg(long)]
    pub no_verify: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// One line per event
    Text,
    /// One JSON object per line
    Json,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub metadata_ast: PathBuf,
    pub streams: Vec<PathBuf>,
    pub limit: Option<usize>,
    pub format: OutputFormat,
    pub skip_corrupt_packets: bool,
    pub playback: PlaybackOptions,
}

impl From<Args> for AppConfig {
    fn from(value: Args) -> Self {
        Self {
            metadata_ast: value.metadata_ast,
            streams: value.streams,
            limit: value.limit,
            format: value.format,
            skip_corrupt_packets: value.skip_corrupt_packets,
            playback: PlaybackOptions {
                verify_magic: !value.no_verify,
                verify_uuid: !value.no_verify,
            },
        }
    }
}

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

pub fn run(config: AppConfig) -> Result<()> {
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let count = dump(&config, &mut out)?;
    out.flush().context("failed to flush output")?;
    info!(events = count, "Playback complete");
    Ok(())
}

pub fn load_metadata(path: &Path) -> Result<Metadata> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read metadata tree at {}", path.display()))?;
    let tree: ast::Metadata = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse metadata tree at {}", path.display()))?;
    Metadata::compile(&tree).with_context(|| format!("invalid metadata in {}", path.display()))
}

/// Decodes every configured stream and writes the merged events to `out`.
/// Returns the number of events written.
pub fn dump<W: Write>(config: &AppConfig, out: &mut W) -> Result<usize> {
    let metadata = load_metadata(&config.metadata_ast)?;
    info!(
        streams = metadata.streams.len(),
        events = metadata.events.len(),
        clocks = metadata.clocks.len(),
        "Compiled trace metadata",
    );

    let mut playbacks = Vec::with_capacity(config.streams.len());
    for path in &config.streams {
        let source = MappedFile::open(path)
            .with_context(|| format!("failed to open stream {}", path.display()))?;
        playbacks.push(StreamPlayback::new(&metadata, source).with_options(config.playback.clone()));
    }
    let mut playback = TracePlayback::new(playbacks).skip_corrupt_packets(config.skip_corrupt_packets);

    let mut count = 0usize;
    while config.limit.map_or(true, |limit| count < limit) {
        let Some(item) = playback.next_event().context("failed to decode event stream")? else {
            break;
        };
        match config.format {
            OutputFormat::Text => writeln!(out, "{}", item.event)?,
            OutputFormat::Json => {
                let mut value = item.event.to_json();
                value["stream_file"] = json!(config.streams[item.stream].display().to_string());
                writeln!(out, "{value}")?;
            }
        }
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;
    use crate::metadata::ast::{BlockEntry, Declaration, StructEntry, TypeSpecifier};
    use tempfile::tempdir;

    fn write_fixture(dir: &Path) -> (PathBuf, PathBuf) {
        let uint8 = TypeSpecifier::integer(&[("size", 8u64.into())]);
        let tree = ast::Metadata {
            declarations: vec![
                Declaration::Trace(vec![BlockEntry::property("byte_order", "le")]),
                Declaration::Event(vec![
                    BlockEntry::string_property("name", "sample"),
                    BlockEntry::property("id", 0u64),
                    BlockEntry::assign(
                        "fields",
                        TypeSpecifier::anonymous_struct(vec![StructEntry::field(uint8, "value")]),
                    ),
                ]),
            ],
        };
        let metadata_path = dir.join("metadata.json");
        fs::write(&metadata_path, serde_json::to_string(&tree).unwrap()).unwrap();
        let stream_path = dir.join("channel0_0");
        fs::write(&stream_path, [1u8, 2, 3]).unwrap();
        (metadata_path, stream_path)
    }

    fn config(metadata_ast: PathBuf, stream: PathBuf, format: OutputFormat) -> AppConfig {
        AppConfig::from(Args {
            metadata_ast,
            streams: vec![stream],
            limit: None,
            format,
            skip_corrupt_packets: false,
            no_verify: false,
        })
    }

    #[test]
    fn test_args__cli_flags__then_config_mapped() {
        let args = Args::try_parse_from([
            "ctf-dump",
            "--metadata-ast",
            "meta.json",
            "--limit",
            "5",
            "--format",
            "json",
            "--no-verify",
            "s0",
            "s1",
        ])
        .unwrap();
        let config = AppConfig::from(args);
        assert_eq!(config.streams, vec![PathBuf::from("s0"), PathBuf::from("s1")]);
        assert_eq!(config.limit, Some(5));
        assert_eq!(config.format, OutputFormat::Json);
        assert!(!config.playback.verify_magic);
        assert!(!config.skip_corrupt_packets);
    }

    #[test]
    fn test_args__no_stream__then_rejected() {
        assert!(Args::try_parse_from(["ctf-dump", "--metadata-ast", "meta.json"]).is_err());
    }

    #[test]
    fn test_dump__text_format__then_one_line_per_event() {
        let dir = tempdir().unwrap();
        let (metadata, stream) = write_fixture(dir.path());
        let mut out = Vec::new();
        let count = dump(&config(metadata, stream, OutputFormat::Text), &mut out).unwrap();
        assert_eq!(count, 3);
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("sample"));
        assert!(lines[2].contains("value = 3"));
    }

    #[test]
    fn test_dump__json_with_limit__then_truncated() {
        let dir = tempdir().unwrap();
        let (metadata, stream) = write_fixture(dir.path());
        let mut config = config(metadata, stream, OutputFormat::Json);
        config.limit = Some(2);
        let mut out = Vec::new();
        assert_eq!(dump(&config, &mut out).unwrap(), 2);
        let first: serde_json::Value =
            serde_json::from_str(String::from_utf8(out).unwrap().lines().next().unwrap()).unwrap();
        assert_eq!(first["name"], "sample");
        assert_eq!(first["fields"]["value"], 1);
        assert!(first["stream_file"].as_str().unwrap().ends_with("channel0_0"));
    }

    #[test]
    fn test_load_metadata__missing_file__then_contextual_error() {
        let dir = tempdir().unwrap();
        let err = load_metadata(&dir.path().join("absent.json")).unwrap_err();
        assert!(err.to_string().contains("failed to read metadata tree"));
    }
}
