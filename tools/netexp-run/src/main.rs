use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use env_logger::Builder;
use log::error;

use dslab_netexp::{Error, Experiment, ExperimentConfig, RunSummary};
use dslab_network::{Delay, TransportVariant};

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
/// Runs a paced traffic experiment over a simulated point-to-point network
struct Args {
    /// Path to YAML file with experiment configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Built-in configuration used when no config file is given (dumbbell, single)
    #[arg(short, long, default_value = "dumbbell")]
    preset: String,

    /// Experiment name used as basename for trace files
    #[arg(long)]
    expname: Option<String>,

    /// Run index (for setting repeatable seeds)
    #[arg(long)]
    run: Option<u64>,

    /// Transport of all flows (TcpNewReno, TcpTahoe, Udp)
    #[arg(long)]
    transport: Option<TransportVariant>,

    /// Packet error rate of the bottleneck link
    #[arg(long)]
    error_rate: Option<f64>,

    /// Propagation delay of the bottleneck link, e.g. 20ms
    #[arg(long)]
    delay: Option<Delay>,

    /// Directory for trace files
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
}

fn load_config(args: &Args) -> Result<ExperimentConfig, Error> {
    let mut config = match &args.config {
        Some(path) => ExperimentConfig::from_file(path)?,
        None => ExperimentConfig::preset(&args.preset)?,
    };
    if let Some(name) = &args.expname {
        config.name = name.clone();
    }
    if let Some(run) = args.run {
        config.run = run;
    }
    if let Some(transport) = args.transport {
        config.transport = transport;
        for flow in config.flows.iter_mut() {
            flow.transport = None;
        }
    }
    if let Some(error_rate) = args.error_rate {
        config.set_bottleneck_error_rate(error_rate)?;
    }
    if let Some(delay) = args.delay {
        config.set_bottleneck_delay(delay)?;
    }
    if let Some(output_dir) = &args.output_dir {
        config.output_dir = output_dir.clone();
    }
    Ok(config)
}

fn run(args: &Args) -> Result<RunSummary, Error> {
    let config = load_config(args)?;
    let mut experiment = Experiment::new(config)?;
    experiment.run()
}

fn main() -> ExitCode {
    Builder::from_default_env()
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(summary) => {
            match serde_json::to_string_pretty(&summary) {
                Ok(json) => println!("{}", json),
                Err(err) => error!("failed to serialize run summary: {}", err),
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{}", err);
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        }
    }
}
