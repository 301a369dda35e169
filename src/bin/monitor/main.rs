//! Summarize a finished (or running) session from its logfile.

use ardufsm::{
    args::MonitorArgs,
    error::Result,
    trial_matrix::{read_log_lines, TrialMatrix},
};
use clap::Parser;
use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::init();
    let args = MonitorArgs::parse();

    match summarize(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("monitor: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn summarize(args: &MonitorArgs) -> Result<()> {
    let lines = read_log_lines(&args.logfile)?;
    let matrix = TrialMatrix::build(&lines)?;

    println!("{}: {} lines, {} trials", args.logfile.display(), lines.len(), matrix.len());

    if args.trials {
        let columns = matrix.columns();
        println!("{}", columns.join("\t"));
        for trial in matrix.iter() {
            let row: Vec<String> = columns
                .iter()
                .map(|c| match trial.value(c) {
                    Some(v) if v.fract() == 0.0 => format!("{}", v as i64),
                    Some(v) => format!("{:.3}", v),
                    None => "-".to_owned(),
                })
                .collect();
            println!("{}", row.join("\t"));
        }
    }

    for (side, (hits, total)) in matrix.count_hits_by_side() {
        println!("{}: {}/{}", side, hits, total);
    }
    println!("{}", matrix.performance());
    Ok(())
}
