//! Monte Carlo Contagion Binary
//!
//! Samples one network per run, runs the configured number of cascade trials
//! on it and writes the default-count histogram of every run to `--out`.
//!
//! ## Usage
//! ```bash
//! cargo run --bin monte_carlo --release -- --runs=5 --trials=200000 --cash=beta
//! ```

use std::process::ExitCode;

use chrono::Local;
use contagion_simulation::config::{usage, SimulationConfig};
use contagion_simulation::monte_carlo::RunControl;
use contagion_simulation::persist::{run_file_name, write_histogram};
use contagion_simulation::simulation::{run_all, RunResult};
use contagion_simulation::Result;

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("Usage: monte_carlo [--key=value ...]\n");
        print!("{}", usage());
        return ExitCode::SUCCESS;
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "simulation failed");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &[String]) -> Result<()> {
    let config = SimulationConfig::from_args(args)?;

    println!("=======================================================");
    println!("  Monte Carlo Contagion Simulation");
    println!("=======================================================");
    println!();
    println!("Parameters:");
    println!("  Institutions: {}, Runs: {}, Trials/run: {}", config.institutions, config.runs, config.trials);
    println!("  Cash:     {:?}", config.cash);
    println!("  Leverage: {:?}", config.leverage);
    println!("  Policy:   {}", config.policy.name());
    println!("  Output:   {}", config.out_dir.display());
    println!();

    let mut rows = Vec::with_capacity(config.runs);
    run_all(&config, &RunControl::new(), |result: RunResult| {
        let name = run_file_name(&config, &Local::now(), result.run);
        let path = write_histogram(&config.out_dir, &name, &result.histogram)?;

        println!("Run {} (seed {})", result.run, result.seed);
        println!("{}", "-".repeat(50));
        println!("  Edges:                   {}", result.network.edges);
        println!("  Mean out-degree:         {:.2}", result.network.mean_out_degree);
        println!("  Isolated institutions:   {}", result.network.isolated);
        result.summary.print();
        println!("  Elapsed:                 {:.2?}", result.elapsed);
        println!("  Written:                 {}", path.display());
        println!();

        rows.push(result);
        Ok(())
    })?;

    println!("=======================================================");
    println!("  Summary Table");
    println!("=======================================================");
    println!();
    print_summary_table(&rows);
    Ok(())
}

fn print_summary_table(rows: &[RunResult]) {
    println!("| Run | Edges  | Mean Defaults | Q99  | Max  | P(Systemic) |");
    println!("|-----|--------|---------------|------|------|-------------|");
    for r in rows {
        println!(
            "| {:3} | {:6} | {:13.2} | {:4} | {:4} | {:10.4}% |",
            r.run,
            r.network.edges,
            r.summary.mean_defaults,
            r.summary.q99,
            r.summary.max_defaults,
            r.summary.systemic_probability * 100.0,
        );
    }
}
