use clap::Parser;

use makeflow::config::{Cli, EngineConfig};
use makeflow::scheduler::RunOutcome;

fn init_tracing(config: &EngineConfig) {
    use tracing_subscriber::EnvFilter;

    let filter = if config.debug_subsystems.is_empty() {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    } else {
        let directives = config.debug_subsystems.iter().map(|s| format!("makeflow::{s}=debug")).collect::<Vec<_>>().join(",");
        EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    match &config.debug_output {
        Some(path) => match std::fs::File::create(path) {
            Ok(file) => {
                let _ = builder.with_writer(std::sync::Mutex::new(file)).try_init();
            }
            Err(e) => eprintln!("makeflow: couldn't open debug output file: {e}"),
        },
        None => {
            let _ = builder.try_init();
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match EngineConfig::from_cli(cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("makeflow: {e}");
            std::process::exit(1);
        }
    };

    init_tracing(&config);

    let result = if config.clean {
        makeflow::engine::clean(&config).map(|()| 0)
    } else if config.syntax_check {
        makeflow::engine::check(&config).map(|()| 0)
    } else if config.emit_graph {
        makeflow::engine::emit_graph(&config).map(|()| 0)
    } else {
        match makeflow::engine::run(&config).await {
            Ok(RunOutcome::Completed) => Ok(0),
            Ok(RunOutcome::Failed) => {
                eprintln!("makeflow: workflow failed");
                Ok(1)
            }
            Ok(RunOutcome::Aborted) => {
                eprintln!("makeflow: aborted");
                Ok(1)
            }
            Err(e) => Err(e),
        }
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("makeflow: {e}");
            std::process::exit(1);
        }
    }
}
