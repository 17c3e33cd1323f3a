//! Count lane occupancy or moving blobs in a frame stream, checkpointing the counts to disk.

use anyhow::{anyhow, Result};
use clap::*;
use frame_loader::LoaderOptions;
use lanecount::prelude::v1::*;
use lanecount::visualiser::AsciiVisualiser;
use log::*;

fn main() -> Result<()> {
    let matches = Command::new("lane-counter")
        .version(crate_version!())
        .about("Counts traffic activity in a motion magnitude frame stream")
        .arg(Arg::new("input").takes_value(true).required(true))
        .arg(
            Arg::new("output")
                .long("output")
                .short('o')
                .takes_value(true)
                .help("Directory to write checkpoint records to"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .takes_value(true)
                .help("JSON run configuration"),
        )
        .arg(
            Arg::new("mode")
                .long("mode")
                .takes_value(true)
                .possible_values(["lanes", "blobs"]),
        )
        .arg(
            Arg::new("backend")
                .long("backend")
                .takes_value(true)
                .possible_values(["components", "hessian"]),
        )
        .arg(Arg::new("threshold").long("threshold").takes_value(true))
        .arg(Arg::new("window").long("window").takes_value(true))
        .arg(Arg::new("stem").long("stem").takes_value(true))
        .arg(Arg::new("skip").long("skip").takes_value(true))
        .arg(Arg::new("rotate").long("rotate"))
        .arg(Arg::new("batch").long("batch").takes_value(true))
        .arg(Arg::new("show").long("show").help("Print every frame as text"))
        .arg(Arg::new("verbose").long("verbose").short('v'))
        .get_matches();

    let filter = if matches.is_present("verbose") {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let input = matches
        .value_of("input")
        .ok_or_else(|| anyhow!("Please supply an input stream!"))?;

    let mut config = match matches.value_of("config") {
        Some(path) => RunConfig::from_json_file(path)?,
        None => RunConfig::default(),
    };

    if let Some(mode) = matches.value_of("mode") {
        config.mode = mode.parse()?;
    }
    if let Some(backend) = matches.value_of("backend") {
        config.blobs.backend = backend.parse()?;
    }
    if let Some(threshold) = matches.value_of("threshold") {
        config.threshold = threshold.parse()?;
    }
    if let Some(window) = matches.value_of("window") {
        config.checkpoint.window = window.parse()?;
    }
    if let Some(stem) = matches.value_of("stem") {
        config.checkpoint.stem = stem.into();
    }
    if let Some(batch) = matches.value_of("batch") {
        config.batch_size = batch.parse()?;
    }

    let options = LoaderOptions {
        skip: matches
            .value_of("skip")
            .map(str::parse::<usize>)
            .transpose()?
            .unwrap_or(0),
        rotate: matches.is_present("rotate"),
    };

    let sink: Box<dyn CheckpointSink> = match matches.value_of("output") {
        Some(dir) => Box::new(DirectorySink::new(dir, config.checkpoint.stem.clone())?),
        None => {
            warn!("No output directory given, checkpoints will not be stored");
            Box::new(NullSink)
        }
    };

    let mut source = frame_loader::create_source(input, options)?;
    let counter = frame_loader::create_counter(&config);

    let mut pipeline = Pipeline::with_boxed(config, counter, sink);

    spawn_interrupt_handler(pipeline.cancel_token())?;

    if matches.is_present("show") {
        pipeline = pipeline.with_visualiser(AsciiVisualiser::new(std::io::stdout()));
    }

    let summary = pipeline.run(&mut source)?;

    if summary.stop == StopReason::Cancelled {
        info!("user aborted.");
    }

    println!("frames:              {}", summary.frames);
    println!("checkpoints:         {}", summary.checkpoints);
    println!("failed checkpoints:  {}", summary.failed_checkpoints);
    println!("suppressed failures: {}", summary.suppressed_failures);
    println!("discarded counts:    {}", summary.discarded);

    Ok(())
}

/// What a Ctrl-C does to the run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Interrupt {
    /// Finish the current frame, then stop gracefully.
    Stop,
    /// A graceful stop was already requested, exit right away.
    Abort,
}

/// Exit status of an aborted run, as for a shell killed by SIGINT.
const ABORT_STATUS: i32 = 130;

fn on_interrupt(cancel: &CancelToken) -> Interrupt {
    if cancel.is_cancelled() {
        Interrupt::Abort
    } else {
        cancel.cancel();
        Interrupt::Stop
    }
}

/// Cancel the run on Ctrl-C, and exit immediately on a second one.
///
/// The signal is awaited on a single threaded runtime in a detached thread, so the pipeline itself
/// stays synchronous.
fn spawn_interrupt_handler(cancel: CancelToken) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    std::thread::spawn(move || {
        runtime.block_on(async {
            loop {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Unable to listen for Ctrl-C: {e}");
                    return;
                }

                match on_interrupt(&cancel) {
                    Interrupt::Stop => {
                        warn!("Interrupted, stopping after the current frame (Ctrl-C again to abort)")
                    }
                    Interrupt::Abort => {
                        error!("Interrupted twice, aborting without a final checkpoint");
                        std::process::exit(ABORT_STATUS);
                    }
                }
            }
        })
    });

    Ok(())
}
