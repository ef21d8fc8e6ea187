use clap::Parser;
use log::{error, info};

use crate::api::{Client, HttpTransport};
use crate::collector::Collector;
use crate::config::{Args, Config};

mod api;
mod collector;
mod config;
mod error;
mod records;

fn main() {
    env_logger::init();

    let config = match Config::try_from(Args::parse()) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    let client = Client::new(HttpTransport::new(), &config);
    let collector = Collector::new(client, config);

    match collector.run() {
        Ok(report) => {
            if report.quota_hit {
                info!(
                    "Stopped early after {} ticks: call budget exhausted",
                    report.ticks_run
                );
            }
            println!("Called the API {} times.", report.calls_made);
        }
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    }
}
