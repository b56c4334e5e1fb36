#![allow(clippy::print_stderr)]

mod cli;
mod commands;
mod errors;
mod tracing;

use crate::commands::Context;
use crate::tracing::TracingConfig;

#[tokio::main]
async fn main() {
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("Application panicked: {panic_info}");
        eprintln!("Internal error occurred. Run with RUST_LOG=debug for more information.");
    }));

    let cli = cli::parse();

    let tracing_config = TracingConfig {
        format: cli.format,
        level: cli.level.into(),
        ..Default::default()
    };
    if let Err(error) = crate::tracing::init_tracing(tracing_config) {
        eprintln!("{error:?}");
        std::process::exit(1);
    }

    let context = match Context::load(&cli) {
        Ok(context) => context,
        Err(error) => {
            eprintln!("{error:?}");
            std::process::exit(1);
        }
    };
    let zero_exit_code_on_failure = context.config.signing.zero_exit_code_on_failure;

    if let Err(error) = commands::execute(&cli, context).await {
        eprintln!("{error:?}");
        if zero_exit_code_on_failure {
            ::tracing::warn!("zero-exit-code-on-failure is set; exiting with code 0");
            return;
        }
        std::process::exit(1);
    }
}
