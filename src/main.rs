//! Obscura CLI - GPU frame pixelation
//!
//! Runs the capture → pixelate → present loop from a TOML configuration,
//! with command-line overrides.

use anyhow::Context;
use obscura::compute::FrameProcessor;
use obscura::prelude::*;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// Parsed command line.
enum Command {
    Run(RunArgs),
    Info(RunArgs),
    Help,
}

/// Options shared by `run` and `info`.
#[derive(Default)]
struct RunArgs {
    config: Option<PathBuf>,
    frames: Option<u64>,
    size: Option<Resolution>,
    block: Option<u32>,
    slots: Option<usize>,
    kernel: Option<PathBuf>,
    source: Option<String>,
    sink: Option<String>,
    out: Option<PathBuf>,
    cpu: bool,
    timeout_ms: Option<u64>,
    verbose: bool,
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("obscura");

    let command = match parse_args(&args[1.min(args.len())..]) {
        Ok(command) => command,
        Err(message) => {
            eprintln!("Error: {message}");
            eprintln!();
            print_usage(program);
            return ExitCode::from(2);
        }
    };

    let result = match command {
        Command::Help => {
            print_usage(program);
            return ExitCode::SUCCESS;
        }
        Command::Run(run_args) => {
            init_logging(run_args.verbose);
            run(&run_args)
        }
        Command::Info(run_args) => {
            init_logging(run_args.verbose);
            info(&run_args)
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn print_usage(program: &str) {
    println!("Obscura v{} - GPU frame pixelation", obscura::VERSION);
    println!();
    println!("Usage: {program} <command> [options]");
    println!();
    println!("Commands:");
    println!("  run               Capture, pixelate and present frames");
    println!("  info              Show the selected GPU adapter, limits and memory types");
    println!("  help              Show this help message");
    println!();
    println!("Options:");
    println!("  --config <file>     Load a TOML pipeline configuration");
    println!("  --frames <n>        Frame budget, 0 runs until the source ends");
    println!("  --size <WxH>        Engine resolution (e.g. 1280x720)");
    println!("  --block <n>         Pixelation block size");
    println!("  --slots <n>         Number of buffering slots");
    println!("  --kernel <file>     Kernel artifact (.wgsl or SPIR-V)");
    println!("  --source <src>      synthetic | gradient | modular | <capture device path>");
    println!("  --sink <sink>       headless | png");
    println!("  --out <dir>         Output directory for the png sink");
    println!("  --cpu               Use the CPU reference processor");
    println!("  --timeout-ms <ms>   Fence timeout");
    println!("  --verbose           Debug logging (RUST_LOG overrides)");
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let Some(command) = args.first() else {
        return Ok(Command::Help);
    };

    let mut run_args = RunArgs::default();
    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        let mut value = || {
            i += 1;
            args.get(i)
                .map(String::as_str)
                .ok_or_else(|| format!("{flag} needs a value"))
        };
        match flag {
            "--config" => run_args.config = Some(PathBuf::from(value()?)),
            "--frames" => run_args.frames = Some(parse_number(flag, value()?)?),
            "--size" => {
                let text = value()?;
                run_args.size = Some(
                    Resolution::parse(text).ok_or_else(|| format!("invalid size '{text}', expected WxH"))?,
                );
            }
            "--block" => run_args.block = Some(parse_number(flag, value()?)?),
            "--slots" => run_args.slots = Some(parse_number(flag, value()?)?),
            "--kernel" => run_args.kernel = Some(PathBuf::from(value()?)),
            "--source" => run_args.source = Some(value()?.to_string()),
            "--sink" => {
                let sink = value()?;
                if !matches!(sink, "headless" | "png") {
                    return Err(format!("unknown sink '{sink}', expected headless or png"));
                }
                run_args.sink = Some(sink.to_string());
            }
            "--out" => run_args.out = Some(PathBuf::from(value()?)),
            "--timeout-ms" => run_args.timeout_ms = Some(parse_number(flag, value()?)?),
            "--cpu" => run_args.cpu = true,
            "--verbose" | "-v" => run_args.verbose = true,
            other => return Err(format!("unknown option '{other}'")),
        }
        i += 1;
    }

    match command.as_str() {
        "run" => Ok(Command::Run(run_args)),
        "info" => Ok(Command::Info(run_args)),
        "help" | "--help" | "-h" => Ok(Command::Help),
        other => Err(format!("unknown command '{other}'")),
    }
}

fn parse_number<T: std::str::FromStr>(flag: &str, text: &str) -> Result<T, String> {
    text.parse()
        .map_err(|_| format!("{flag} expects a number, got '{text}'"))
}

/// Load the configuration file (if any) and apply command-line overrides.
fn build_config(args: &RunArgs) -> anyhow::Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("failed to load configuration {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    if let Some(frames) = args.frames {
        config.run.frames = frames;
    }
    if let Some(size) = args.size {
        config.engine.width = size.width;
        config.engine.height = size.height;
    }
    if let Some(block) = args.block {
        config.engine.block_size = block;
    }
    if let Some(slots) = args.slots {
        config.engine.slots = slots;
    }
    if let Some(kernel) = &args.kernel {
        config.engine.kernel = Some(kernel.clone());
    }
    if let Some(timeout) = args.timeout_ms {
        config.engine.fence_timeout_ms = timeout;
    }
    if args.cpu {
        config.engine.backend = Backend::Cpu;
    }
    if let Some(source) = args.source.as_deref() {
        match source {
            "synthetic" => config.source.kind = SourceKind::Synthetic,
            "gradient" | "modular" => {
                config.source.kind = SourceKind::Synthetic;
                config.source.pattern = if source == "gradient" {
                    Pattern::Gradient
                } else {
                    Pattern::Modular
                };
            }
            path => {
                config.source.kind = SourceKind::Device;
                config.source.path = PathBuf::from(path);
            }
        }
    }
    match args.sink.as_deref() {
        Some("png") => config.sink.kind = SinkKind::Png,
        Some(_) => config.sink.kind = SinkKind::Headless,
        None => {}
    }
    if let Some(out) = &args.out {
        config.sink.dir = Some(out.clone());
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn run(args: &RunArgs) -> anyhow::Result<()> {
    let mut config = build_config(args)?;

    let mut sink = open_sink(&config.sink).context("failed to open presentation sink")?;
    if sink.wants_host_pixels() && !config.engine.readback {
        log::info!("{} sink needs host pixels, enabling readback", sink.name());
        config.engine.readback = true;
    }

    let mut processor: Box<dyn FrameProcessor> = match config.engine.backend {
        Backend::Gpu => {
            let ctx = DeviceContext::initialize(&config.device)
                .context("failed to initialize GPU device")?;
            let engine = ComputeEngine::new(Arc::new(ctx), &config.engine)
                .context("failed to build compute engine")?;
            Box::new(engine)
        }
        Backend::Cpu => Box::new(
            CpuProcessor::from_config(&config.engine).context("failed to build CPU processor")?,
        ),
    };

    let mut source = open_source(&config.source, processor.resolution())
        .context("failed to open frame source")?;

    let stats = Runner::new(RunOptions::from_config(&config))
        .run(processor.as_mut(), source.as_mut(), sink.as_mut())
        .context("pipeline aborted")?;

    println!("{stats}");
    Ok(())
}

fn info(args: &RunArgs) -> anyhow::Result<()> {
    let config = build_config(args)?;
    let ctx = DeviceContext::initialize(&config.device).context("failed to initialize GPU device")?;
    let limits = ctx.limits();

    println!("Adapter: {}", ctx.adapter_info);
    println!("  Vendor: {:#06x}  Device: {:#06x}", ctx.adapter_info.vendor, ctx.adapter_info.device);
    println!("  Driver: {}", ctx.adapter_info.driver);
    println!();
    println!("Limits:");
    println!("  max_texture_dimension_2d: {}", limits.max_texture_dimension_2d);
    println!("  max_push_constant_size:   {}", limits.max_push_constant_size);
    println!(
        "  max_compute_workgroups_per_dimension: {}",
        limits.max_compute_workgroups_per_dimension
    );
    println!();
    println!("Memory types:");
    for (index, memory_type) in ctx.memory_types().types().iter().enumerate() {
        println!(
            "  [{index}] {:<48} {:?}",
            memory_type.properties.to_string(),
            memory_type.strategy
        );
    }

    let resolution = config.engine.resolution();
    match ctx.validate_resolution(resolution) {
        Ok(()) => println!("\nEngine resolution {resolution} is supported"),
        Err(err) => println!("\nEngine resolution {resolution} is NOT supported: {err}"),
    }
    Ok(())
}
