use clap::Command;

use chrono::prelude::*;
use log::{error, info};
use nix::unistd::Uid;
use simplelog::*;

use std::fs::File;
use std::process::exit;

use steelwall::os::input::Prompt;
use steelwall::os::setup::{Pipeline, RunReport};
use steelwall::utils::config::HardenConfig;
use steelwall::utils::tools::LocalHost;

const REPORT_PATH: &str = "steelwall_report.json";

fn init_logging(dt: &DateTime<Local>) -> Result<(), Box<dyn std::error::Error>> {
    CombinedLogger::init(vec![
        TermLogger::new(
            LevelFilter::Debug,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        WriteLogger::new(
            LevelFilter::Info,
            Config::default(),
            File::create(format!("steelwall_{}.log", dt.format("%Y_%m_%d_%H_%M_%S")))?,
        ),
    ])?;
    Ok(())
}

fn write_report(report: &RunReport) -> Result<(), Box<dyn std::error::Error>> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(REPORT_PATH, json)?;
    Ok(())
}

fn main() {
    Command::new("SteelWall")
        .author("Joe Abbate, joe.abbate@mail.rit.edu")
        .version("1.1.0")
        .about("Locks a Linux host behind a persistent, default-deny iptables policy")
        .get_matches();

    let dt = Local::now();
    if let Err(e) = init_logging(&dt) {
        eprintln!("Could not start logging: {}", e);
        exit(1);
    }

    if !Uid::effective().is_root() {
        error!("SteelWall must be run as root");
        exit(1);
    }

    let config = HardenConfig::default();
    let host = LocalHost;
    let mut prompt = Prompt::stdin();
    let mut pipeline = Pipeline::new(&config, &host);

    match pipeline.run(&mut prompt) {
        Ok(report) => {
            for policy in &report.policies {
                info!("{}: {} rules", policy.family, policy.rule_count);
            }
            if !report.disabled_managers.is_empty() {
                info!("Disabled {}", report.disabled_managers.join(", "));
            }
            for artifact in &report.artifacts {
                info!("{} => {} ({})", artifact.family, artifact.path.display(), artifact.sha1);
            }
            info!(
                "Boot replay: {} via {}",
                report.persistence.replay_script.display(),
                report.persistence.unit_path.display()
            );
            match write_report(&report) {
                Ok(()) => info!("Wrote run report to {}", REPORT_PATH),
                Err(e) => error!("Could not write {}: {}", REPORT_PATH, e),
            }
        }
        Err(e) => {
            error!("{}", e);
            exit(e.exit_code());
        }
    }
}
