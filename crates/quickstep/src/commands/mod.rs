use std::time::Duration;

use anyhow::Result;
use quickstep_app::QuickstepConfig;

use crate::Command;

mod explain;
mod simulate;

use simulate::SimulateOptions;

/// Execute a CLI subcommand and print its report to stdout.
pub fn run(command: Command, config: &QuickstepConfig) -> Result<()> {
    match command {
        Command::Simulate {
            tasks,
            visible,
            latency_ms,
            high_res,
        } => {
            let options = SimulateOptions {
                tasks,
                visible,
                latency: Duration::from_millis(latency_ms),
                high_res,
            };
            let report = simulate::run(config, &options)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::ExplainConsumer { file, json } => {
            let explanation = explain::from_file(&file)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&explanation)?);
            } else {
                print!("{}", explanation.render());
            }
        }
    }
    Ok(())
}
