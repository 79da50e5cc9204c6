//! CosmoFlow launcher CLI
//!
//! Configures and launches CosmoFlow training jobs on HPC clusters.

use clap::Parser;
use cosmoflow_launch::config::{CliArgs, Commands, LaunchConfig, LogFormat};
use cosmoflow_launch::core::LaunchEngine;
use cosmoflow_launch::error::Result;
use cosmoflow_launch::launcher::{configure, EnvSnapshot, LaunchMode, TuningRequest};
use cosmoflow_launch::system::{detect_system, SchedulerKind, SystemDefaults, CLUSTER_PROFILES};
use tracing_subscriber::EnvFilter;

fn main() {
    // Parse CLI arguments
    let args = CliArgs::parse();

    init_logging(&args);

    // Handle result
    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(args: &CliArgs) {
    let level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };
    // RUST_LOG wins over -v/-q
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match args.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}

fn run(args: CliArgs) -> Result<()> {
    // Handle subcommands
    if let Some(command) = &args.command {
        return handle_command(command, &args);
    }

    // Build configuration
    let config = LaunchConfig::from_cli(&args)?;

    // Print configuration if verbose
    if args.verbose > 0 && !args.quiet {
        print_config(&config);
    }

    let engine = LaunchEngine::new(config);

    if engine.config().job.mode == LaunchMode::SetupOnly && !args.quiet {
        println!("=== Setup Only ===");
        println!("The job will not be launched.");
        println!();
    }

    let summary = engine.execute()?;

    // Print results
    if !args.quiet {
        summary.print_summary();
    }

    Ok(())
}

fn handle_command(command: &Commands, args: &CliArgs) -> Result<()> {
    match command {
        Commands::Clusters => cmd_clusters(),
        Commands::Env {
            system,
            scheduler,
            procs_per_node,
            json,
        } => cmd_env(system.clone(), *scheduler, *procs_per_node, *json),
        Commands::Reader => cmd_reader(args),
    }
}

fn cmd_clusters() -> Result<()> {
    println!(
        "{:<10} {:<6} {:>5} {:>5}  {}",
        "NAME", "SCHED", "CORES", "GPUS", "FAMILY"
    );
    for profile in CLUSTER_PROFILES {
        println!(
            "{:<10} {:<6} {:>5} {:>5}  {:?}",
            profile.name,
            profile.scheduler.name(),
            profile.cores_per_node,
            profile.gpus_per_node,
            profile.family
        );
    }
    Ok(())
}

fn cmd_env(
    system: Option<String>,
    scheduler: Option<SchedulerKind>,
    procs_per_node: Option<u32>,
    json: bool,
) -> Result<()> {
    let system = system.unwrap_or_else(detect_system);
    let defaults = SystemDefaults::for_system(&system);
    let scheduler = scheduler.unwrap_or(defaults.scheduler);
    let procs_per_node = procs_per_node.unwrap_or(defaults.procs_per_node);
    let request = TuningRequest::new(&system, procs_per_node, scheduler);
    let tuned = configure(request, &EnvSnapshot::from_process())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&tuned)?);
        return Ok(());
    }

    println!("# {}", env_header(&system, scheduler, procs_per_node));
    for (key, value) in tuned.environment.iter() {
        println!("export {}=\"{}\"", key, value);
    }
    if !tuned.launcher_args.is_empty() {
        println!("# launcher args: {}", tuned.launcher_args.join(" "));
    }
    Ok(())
}

fn env_header(system: &str, scheduler: SchedulerKind, procs_per_node: u32) -> String {
    format!("{} ({}, {} procs/node)", system, scheduler, procs_per_node)
}

fn cmd_reader(args: &CliArgs) -> Result<()> {
    let config = LaunchConfig::from_cli(args)?;
    let reader = LaunchEngine::new(config).build_data_reader()?;
    print!("{}", reader.to_prototext());
    Ok(())
}

fn print_config(config: &LaunchConfig) {
    let job = &config.job;
    println!("=== Configuration ===");
    println!("System:      {} ({})", job.system, job.scheduler);
    println!("Nodes:       {}", job.nodes);
    println!("Procs/node:  {}", job.procs_per_node);
    println!("Mini-batch:  {}", config.mini_batch_size);
    println!("Epochs:      {}", config.model.num_epochs);
    println!("Input width: {}", config.model.input_width);
    println!("Dataset:     {:?}", config.dataset);
    println!("Optimizer:   {:?}", config.optimizer);
    println!("Executable:  {}", job.executable);

    if let Some(ref strategy) = config.model.parallel_strategy {
        println!("\n=== Distconv ===");
        println!("Depth groups:  {}", strategy.depth_groups);
        println!("Height groups: {}", strategy.height_groups);
        println!("Width groups:  {}", strategy.width_groups);
        println!("DaCe:          {}", config.dace);
    }

    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_header_uses_requested_values() {
        // lassen defaults to lsf with 4 procs per node
        assert_eq!(
            env_header("lassen", SchedulerKind::Slurm, 2),
            "lassen (slurm, 2 procs/node)"
        );
    }
}
