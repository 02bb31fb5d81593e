use anyhow::Result;
use clap::Parser;
use ctf_playback::app::{self, AppConfig, Args};

fn main() -> Result<()> {
    let args = Args::parse();
    app::init_tracing();
    let config = AppConfig::from(args);
    app::run(config)
}
