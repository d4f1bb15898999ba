//
// main.rs
//
// codemon command-line entry point
//

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use codemon::command_harness::CommandHarness;
use codemon::config::{CodemonConfig, DEFAULT_CONFIG_FILE};
use codemon::coordinator::{Coordinator, RunOptions};
use codemon::store::FileMapStore;

fn print_usage() {
    println!("codemon {}, a test-impact watcher.", env!("CARGO_PKG_VERSION"));
    print!(
        r#"
Usage: codemon [OPTIONS]

Available options:

--config PATH                Read configuration from PATH (default: {DEFAULT_CONFIG_FILE})
--cached                     Use the persisted influence map instead of rebuilding it
--map-only                   Build or load the influence map, then exit
-v, --verbose                Log debug output
-q, --quiet                  Only log warnings and errors
--version                    Print the version
--help                       Print this help message

"#
    );
}

fn init_logging(level: log::LevelFilter) {
    // RUST_LOG, when set, overrides the flag-selected level
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut argv = env::args();
    argv.next(); // skip executable name

    let mut config_path = PathBuf::from(DEFAULT_CONFIG_FILE);
    let mut use_cached = false;
    let mut map_only = false;
    let mut level = log::LevelFilter::Info;

    while let Some(arg) = argv.next() {
        match arg.as_str() {
            "--config" => {
                let path = argv
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--config requires a path"))?;
                config_path = PathBuf::from(path);
            }
            "--cached" => use_cached = true,
            "--map-only" => map_only = true,
            "-v" | "--verbose" => level = log::LevelFilter::Debug,
            "-q" | "--quiet" => level = log::LevelFilter::Warn,
            "--version" => {
                println!("codemon {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" => {
                print_usage();
                return Ok(());
            }
            other => {
                return Err(anyhow::anyhow!("Unknown argument: '{other}'"));
            }
        }
    }

    init_logging(level);

    let config = CodemonConfig::from_file(&config_path)?;
    let options = RunOptions {
        use_cached,
        map_only,
        ..RunOptions::from_config(&config)
    };
    let store = Arc::new(FileMapStore::new(config.map_file.clone()));
    let harness = Arc::new(CommandHarness::from_config(&config));
    let coordinator = Coordinator::new(config, harness, store, options);

    coordinator
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Cannot listen for Ctrl-C: {}", e);
            }
        })
        .await?;
    Ok(())
}
