use clap::Parser;
use k_mirror::mirror::config::OverseerConfig;
use k_mirror::mirror::ops::OpsConfig;
use k_mirror::mirror::overseer::Overseer;
use k_mirror::mirror::result_error::error::Error;
use k_mirror::mirror::result_error::WithMsg;
use std::fs::File;
use std::path::PathBuf;
use std::process::exit;
use tracing::error;
use validator::Validate;

/// Periodically copy sources to backup directories, keeping the newest few
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Location of config file
    #[arg(short, long)]
    config: PathBuf,
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let res = File::open(&args.config)
        .map_err(Error::from)
        .and_then(|f| {
            serde_yml::from_reader::<_, OverseerConfig>(f)
                .map_err(Error::from)
                .with_msg(format!("Parse YAML config failed: {:?}", &args.config))
        })
        .and_then(|oc| {
            oc.validate()
                .map_err(Error::from)
                .map(|_| oc)
                .with_msg(format!("Config validation failed: {:?}", &args.config))
        })
        .and_then(|oc| {
            Overseer::<OpsConfig>::from_config(&oc).map(|overseer| (oc, overseer))
        })
        .and_then(|(oc, overseer)| overseer.run_all(oc.max_run_time));

    if let Err(e) = res {
        error!("{e}");
        exit(1);
    }
}
