use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use rand::Rng;
use rtpcm_core::{
    rt, ChannelTable, Consumer, Device, DeviceInfo, Diagnostics, Direction, HardwareProfile,
    SampleBlock, SessionConfig, SimClock, SimulatedHardware,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    match cli.command {
        Commands::Profiles(args) => list_profiles(args),
        Commands::Channels(args) => print_channels(args),
        Commands::Run(args) => execute_run(args),
    }
}

#[derive(Parser)]
#[command(author, version, about = "Drive period-synchronous audio sessions on simulated hardware")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the known hardware profiles.
    Profiles(ProfilesArgs),
    /// Print the channel descriptor tables of a profile.
    Channels(ChannelsArgs),
    /// Run a pass-through consumer against the clocked simulator.
    Run(RunArgs),
}

#[derive(Args)]
struct ProfilesArgs {
    /// Emit JSON instead of a table.
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct ChannelsArgs {
    /// Hardware profile name.
    #[arg(long, default_value = "elk-pi")]
    profile: String,
    /// Only print one direction.
    #[arg(long, value_enum)]
    direction: Option<DirectionArg>,
    /// Emit JSON instead of a table.
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct RunArgs {
    /// Hardware profile name.
    #[arg(long, default_value = "elk-pi")]
    profile: String,
    /// Session configuration file (JSON); defaults to the profile's.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Number of periods to process.
    #[arg(long, default_value_t = 1000)]
    periods: u64,
    /// Override the period size in frames.
    #[arg(long)]
    frames: Option<usize>,
    /// Stall the consumer every K periods (0 disables stalling).
    #[arg(long, default_value_t = 0)]
    stall_every: u64,
    /// Length of each stall, in periods.
    #[arg(long, default_value_t = 3)]
    stall_periods: u32,
    /// SCHED_FIFO priority for the consumer thread.
    #[arg(long, default_value_t = rt::DEFAULT_RT_PRIORITY)]
    priority: i32,
    /// Emit JSON instead of a summary.
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DirectionArg {
    Input,
    Output,
}

impl From<DirectionArg> for Direction {
    fn from(value: DirectionArg) -> Self {
        match value {
            DirectionArg::Input => Direction::Input,
            DirectionArg::Output => Direction::Output,
        }
    }
}

fn resolve_profile(name: &str) -> Result<HardwareProfile> {
    HardwareProfile::by_name(name).with_context(|| {
        let known: Vec<_> = HardwareProfile::all().iter().map(|p| p.name).collect();
        format!("known profiles: {}", known.join(", "))
    })
}

fn list_profiles(args: ProfilesArgs) -> Result<()> {
    let profiles = HardwareProfile::all();
    if args.json {
        println!("{}", serde_json::to_string_pretty(profiles)?);
        return Ok(());
    }

    println!("{:<16} {:>4} {:>4} {:>8}  format", "profile", "in", "out", "rate");
    for profile in profiles {
        println!(
            "{:<16} {:>4} {:>4} {:>8}  {}",
            profile.name,
            profile.input_channels,
            profile.output_channels,
            profile.sample_rate,
            profile.sample_format
        );
    }
    Ok(())
}

fn print_channels(args: ChannelsArgs) -> Result<()> {
    let profile = resolve_profile(&args.profile)?;
    let device = Device::new(profile, Box::new(SimulatedHardware::new(SimClock::Manual)));
    let session = device
        .open_session(&profile.session_config())
        .with_context(|| format!("failed to open a session on {}", profile.name))?;

    let directions = match args.direction {
        Some(direction) => vec![Direction::from(direction)],
        None => vec![Direction::Input, Direction::Output],
    };
    let tables: Vec<ChannelTable> = directions
        .into_iter()
        .map(|direction| session.channel_info(direction))
        .collect();

    if args.json {
        let entries: Vec<_> = tables.iter().flat_map(|table| table.iter()).collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for table in &tables {
        println!("{} channels ({}):", table.direction(), table.len());
        for descriptor in table {
            println!(
                "  {:<8} sw={:<3} hw={:<3} offset={:<3} stride={:<3} {}",
                descriptor.label(),
                descriptor.logical_index(),
                descriptor.hardware_index(),
                descriptor.offset_words(),
                descriptor.stride_words(),
                descriptor.sample_format()
            );
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct RunReport {
    device: DeviceInfo,
    config: SessionConfig,
    cycles: u64,
    diagnostics: Diagnostics,
}

fn execute_run(args: RunArgs) -> Result<()> {
    let profile = resolve_profile(&args.profile)?;
    let mut config = match &args.config {
        Some(path) => SessionConfig::from_json_file(path)
            .with_context(|| format!("{} is not a usable session config", path.display()))?,
        None => profile.session_config(),
    };
    if let Some(frames) = args.frames {
        config = config.with_period(frames);
    }

    if let Err(err) = rt::lock_memory() {
        tracing::warn!(?err, "failed to lock process memory");
    }

    let clock = SimClock::Clocked {
        sample_rate: profile.sample_rate,
        period_frames: config.frames_per_period,
    };
    let period = clock
        .period()
        .ok_or_else(|| anyhow!("profile {} has no sample rate", profile.name))?;
    let device = Device::new(profile, Box::new(SimulatedHardware::new(clock)));
    let session = device
        .open_session(&config)
        .with_context(|| format!("failed to open a session on {}", profile.name))?;
    let consumer = session.consumer()?;

    let stall = Stall {
        every: args.stall_every,
        length: period * args.stall_periods,
        period,
    };
    let periods = args.periods;
    let priority = args.priority;
    let worker = thread::Builder::new()
        .name("rtpcm-consumer".into())
        .spawn(move || consume(consumer, periods, priority, stall))
        .context("failed to spawn consumer thread")?;

    session.start().context("failed to start session")?;
    let device_info = device.info();
    let cycles = worker
        .join()
        .map_err(|_| anyhow!("consumer thread panicked"))?
        .context("consumer loop failed")?;
    session.stop().context("failed to stop session")?;
    let diagnostics = session.close();

    let report = RunReport {
        device: device_info,
        config,
        cycles,
        diagnostics,
    };
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{}: {} periods of {} frames, {} in / {} out ({})",
            report.device.profile,
            report.cycles,
            report.config.frames_per_period,
            report.config.input_channels,
            report.config.output_channels,
            report.config.sample_format
        );
        println!(
            "  completions={} acknowledged={} under-runs={}",
            report.diagnostics.completions,
            report.diagnostics.acknowledged,
            report.diagnostics.under_runs
        );
    }
    Ok(())
}

#[derive(Clone, Copy)]
struct Stall {
    every: u64,
    length: Duration,
    period: Duration,
}

impl Stall {
    fn due(&self, cycle: u64) -> bool {
        self.every > 0 && cycle % self.every == self.every - 1
    }
}

fn consume(
    mut consumer: Consumer,
    periods: u64,
    priority: i32,
    stall: Stall,
) -> Result<u64, rtpcm_core::SessionError> {
    if let Err(err) = rt::promote_current_thread(priority) {
        tracing::warn!(?err, priority, "running consumer without real-time priority");
    }

    let layout = *consumer.layout();
    let inputs = layout.channels(Direction::Input);
    let outputs = layout.channels(Direction::Output);
    let mut rng = rand::thread_rng();
    let mut cycles = 0;

    while cycles < periods {
        match consumer.run_cycle(|period| {
            let (input, output) = period.split();
            pass_through(input, output, inputs, outputs);
            if stall.due(cycles) {
                // A little jitter so stalls do not line up with the clock.
                let jitter = rng.gen_range(0..=stall.period.as_micros() as u64 / 4);
                thread::sleep(stall.length + Duration::from_micros(jitter));
            }
        }) {
            Ok(_) => cycles += 1,
            Err(err) if err.is_shutdown() => break,
            Err(err) => return Err(err),
        }
    }
    Ok(cycles)
}

/// Copies matching channels frame by frame and silences the rest.
fn pass_through(input: SampleBlock<'_>, output: SampleBlock<'_>, inputs: usize, outputs: usize) {
    if outputs == 0 {
        return;
    }
    let frames = output.len() / outputs;
    for frame in 0..frames {
        for channel in 0..outputs {
            let sample = if channel < inputs {
                input.load(frame * inputs + channel)
            } else {
                0
            };
            output.store(frame * outputs + channel, sample);
        }
    }
}
