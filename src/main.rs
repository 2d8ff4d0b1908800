use log::{error, info, warn};
use std::process;
use std::sync::Arc;
use structopt::StructOpt;

use flowcollector::metrics::Metrics;
use flowcollector::settings::{Opt, Settings};
use flowcollector::{logger, threads};

#[tokio::main]
async fn main() {
    let opt = Opt::from_args();

    // read config from file
    let mut settings = match Settings::init(opt.config.clone()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load the configuration: {}", e);
            process::exit(1);
        }
    };
    settings.apply(&opt);

    logger::init(&settings.log.level);
    warn!("Starting APP");

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
        }
    };

    if let Err(e) = threads::run(&settings, Arc::new(Metrics::default()), shutdown).await {
        error!("{}", e);
        process::exit(1);
    }

    info!("Closing APP");
}
