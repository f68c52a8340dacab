// PatternBench - Pattern Playback and Capture Engine
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

mod report;

use anyhow::Context;
use clap::{Parser, Subcommand};
use patternbench_config::{BackendKind, BenchManifest};
use patternbench_core::codec::GlueTextCodec;
use patternbench_core::device::{BenchDriver, DeviceKind, Driver};
use patternbench_core::engine::{build_engine, PatternEngine, RunOptions};
use patternbench_core::link::server::ServedDevice;
use patternbench_core::link::LinkServer;
use patternbench_core::{EngineError, IoMap, Pattern, PatternId};
use report::{sha256_file, CaptureRecord, InputRecord, RunReport, RunStatus};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};

const EXIT_PASS: u8 = 0;
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_RUNTIME_ERROR: u8 = 3;

#[derive(Debug, Clone)]
struct PatternArg {
    id: PatternId,
    path: PathBuf,
}

/// `<resource>:<channel>=<file>`
fn parse_pattern_arg(s: &str) -> Result<PatternArg, String> {
    let (target, path) = s
        .split_once('=')
        .ok_or_else(|| format!("Expected <resource>:<channel>=<file>, got '{}'", s))?;
    let (resource, channel) = target
        .split_once(':')
        .ok_or_else(|| format!("Expected <resource>:<channel> before '=', got '{}'", target))?;
    if resource.is_empty() || channel.is_empty() || path.is_empty() {
        return Err(format!("Incomplete pattern argument '{}'", s));
    }
    Ok(PatternArg {
        id: PatternId::new(resource, channel),
        path: PathBuf::from(path),
    })
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "PatternBench pattern playback and capture",
    long_about = None
)]
struct Cli {
    /// Enable debug-level logging
    #[arg(short, long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load and validate a bench manifest and its IO map.
    Validate(ValidateArgs),

    /// Play patterns into a bench and capture the response.
    Run(RunArgs),

    /// Serve a virtual register device over the control link.
    Serve(ServeArgs),
}

#[derive(Parser, Debug)]
struct ValidateArgs {
    /// Path to the bench manifest (YAML)
    #[arg(short, long)]
    bench: PathBuf,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Path to the bench manifest (YAML)
    #[arg(short, long)]
    bench: PathBuf,

    /// Pattern to play, as <resource>:<channel>=<file> (repeatable)
    #[arg(short, long = "pattern", value_parser = parse_pattern_arg, required = true)]
    patterns: Vec<PatternArg>,

    /// Replicate every sample this many times before transport
    #[arg(long, default_value = "1")]
    time_scale: u32,

    /// Decimate captures back to the unscaled length
    #[arg(long)]
    descale: bool,

    /// Register-mapped benches: run without reading the capture back
    #[arg(long)]
    no_drain: bool,

    /// Persist captures as <tag>_<resource>_<channel>.glue
    #[arg(long)]
    tag: Option<String>,

    /// Directory for persisted captures
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Write a JSON run report
    #[arg(long)]
    report: Option<PathBuf>,

    /// Delay between reader start and trigger, in microseconds
    #[arg(long)]
    pre_trigger_delay_us: Option<u64>,
}

#[derive(Parser, Debug)]
struct ServeArgs {
    /// Path to the bench manifest (YAML)
    #[arg(short, long)]
    bench: PathBuf,

    /// Resource to export; must use the virtual backend
    #[arg(short, long)]
    resource: String,

    /// TCP port to listen on (0 picks a free port)
    #[arg(short, long, default_value = "12345")]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Device type announced to clients
    #[arg(long, default_value = "Caribou")]
    device_type: String,

    /// Exit after the first client disconnects
    #[arg(long)]
    once: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.trace {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    match cli.command {
        Commands::Validate(args) => run_validate(args),
        Commands::Run(args) => run_patterns(args),
        Commands::Serve(args) => run_serve(args),
    }
}

fn load_bench(path: &Path) -> anyhow::Result<(BenchManifest, IoMap)> {
    let bench = BenchManifest::from_file(path)?;
    let io_map = IoMap::from_manifest(&bench)
        .with_context(|| format!("Invalid IO map in {:?}", path))?;
    Ok((bench, io_map))
}

fn run_validate(args: ValidateArgs) -> ExitCode {
    match load_bench(&args.bench) {
        Ok((bench, io_map)) => {
            info!(
                "Bench '{}' is valid: {} families, {} resources, {} signals",
                bench.name,
                bench.families.len(),
                bench.resources.len(),
                io_map.len()
            );
            ExitCode::from(EXIT_PASS)
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(EXIT_CONFIG_ERROR)
        }
    }
}

fn finish(report: &RunReport, path: Option<&Path>, code: u8) -> ExitCode {
    if let Some(path) = path {
        if let Err(e) = report.write(path) {
            error!("{:#}", e);
            return ExitCode::from(EXIT_RUNTIME_ERROR);
        }
        info!("Report written to {:?}", path);
    }
    ExitCode::from(code)
}

fn run_patterns(args: RunArgs) -> ExitCode {
    let mut report = RunReport::new(&args.bench);
    let report_path = args.report.as_deref();

    let (bench, io_map) = match load_bench(&args.bench) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("{:#}", e);
            report.fail(RunStatus::ConfigError, format!("{:#}", e));
            return finish(&report, report_path, EXIT_CONFIG_ERROR);
        }
    };

    let codec = GlueTextCodec;
    let mut patterns = Vec::with_capacity(args.patterns.len());
    for arg in &args.patterns {
        let pattern = match Pattern::from_artifact(&arg.path, &codec, arg.id.clone()) {
            Ok(p) => p,
            Err(e) => {
                error!("Pattern {}: {}", arg.id, e);
                report.fail(RunStatus::ConfigError, format!("Pattern {}: {}", arg.id, e));
                return finish(&report, report_path, EXIT_CONFIG_ERROR);
            }
        };
        let sha256 = match sha256_file(&arg.path) {
            Ok(digest) => digest,
            Err(e) => {
                error!("Pattern {}: {:#}", arg.id, e);
                report.fail(RunStatus::RuntimeError, format!("Pattern {}: {:#}", arg.id, e));
                return finish(&report, report_path, EXIT_RUNTIME_ERROR);
            }
        };
        report.inputs.push(InputRecord {
            resource: arg.id.resource_id.clone(),
            channel: arg.id.channel_id.clone(),
            path: arg.path.clone(),
            sha256,
            samples: pattern.len(),
        });
        patterns.push(pattern);
    }

    let options = RunOptions {
        time_scale: args.time_scale,
        descale: args.descale,
        drain: !args.no_drain,
        pre_trigger_delay: args.pre_trigger_delay_us.map(Duration::from_micros),
    };

    let target = patterns[0].resource_id().to_string();
    let captures = build_engine(&bench, &io_map, &BenchDriver, &target)
        .and_then(|mut engine| engine.execute(&patterns, &options));
    let captures = match captures {
        Ok(captures) => captures,
        Err(e) => return engine_failure(&mut report, report_path, e),
    };

    if args.tag.is_some() {
        if let Err(e) = std::fs::create_dir_all(&args.output_dir) {
            error!("Failed to create output dir {:?}: {}", args.output_dir, e);
            report.fail(RunStatus::RuntimeError, e.to_string());
            return finish(&report, report_path, EXIT_RUNTIME_ERROR);
        }
    }

    for capture in &captures {
        let artifact = match &args.tag {
            Some(tag) => match capture.persist(tag, &args.output_dir, &codec) {
                Ok(path) => Some(path),
                Err(e) => {
                    error!("{}", e);
                    report.fail(RunStatus::RuntimeError, e.to_string());
                    return finish(&report, report_path, EXIT_RUNTIME_ERROR);
                }
            },
            None => None,
        };
        info!(
            "Captured {} samples from {}{}",
            capture.len(),
            capture.origin,
            artifact
                .as_ref()
                .map(|p| format!(" -> {:?}", p))
                .unwrap_or_default()
        );
        report.captures.push(CaptureRecord::new(capture, artifact));
    }

    finish(&report, report_path, EXIT_PASS)
}

fn engine_failure(report: &mut RunReport, report_path: Option<&Path>, e: EngineError) -> ExitCode {
    error!("{}", e);
    let (status, code) = if e.is_validation() {
        (RunStatus::ConfigError, EXIT_CONFIG_ERROR)
    } else {
        (RunStatus::RuntimeError, EXIT_RUNTIME_ERROR)
    };
    report.fail(status, e.to_string());
    finish(report, report_path, code)
}

fn run_serve(args: ServeArgs) -> ExitCode {
    let (bench, _) = match load_bench(&args.bench) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let Some(resource) = bench.resource(&args.resource) else {
        error!("Unknown resource '{}'", args.resource);
        return ExitCode::from(EXIT_CONFIG_ERROR);
    };
    if resource.backend != BackendKind::Virtual {
        error!(
            "Resource '{}' uses the {:?} backend; only virtual devices can be served",
            resource.id, resource.backend
        );
        return ExitCode::from(EXIT_CONFIG_ERROR);
    }
    let Some(family) = bench.family(&resource.family) else {
        error!("Unknown family '{}'", resource.family);
        return ExitCode::from(EXIT_CONFIG_ERROR);
    };

    let kind = DeviceKind::from_family(family);
    let channel = resource.channel_id().to_string();
    let device = match BenchDriver.open(resource, &kind, std::slice::from_ref(&channel)) {
        Ok(device) => device,
        Err(e) => {
            error!("Failed to open '{}': {}", resource.id, e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let addr = format!("{}:{}", args.host, args.port);
    let served = vec![ServedDevice {
        device_type: args.device_type.clone(),
        device,
    }];
    let server = match LinkServer::bind(&addr, served) {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            return ExitCode::from(EXIT_RUNTIME_ERROR);
        }
    };
    match server.local_addr() {
        Ok(local) => info!("Serving '{}' as {} on {}", resource.id, args.device_type, local),
        Err(e) => error!("Failed to read local address: {}", e),
    }

    let served = if args.once {
        server.serve_one()
    } else {
        server.serve()
    };
    match served {
        Ok(()) => ExitCode::from(EXIT_PASS),
        Err(e) => {
            error!("Control link failed: {}", e);
            ExitCode::from(EXIT_RUNTIME_ERROR)
        }
    }
}
