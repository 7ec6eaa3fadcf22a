use std::{process, sync::Arc};

use kiosk_cache::{
    application::{
        commands::{self, fixtures_path},
        context::CacheStack,
        error::AppError,
    },
    cache::DataSource,
    config,
    infra::{fixtures::JsonFixtureSource, telemetry},
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    let report = error.report();
    if dispatcher::has_been_set() {
        error!(source = report.source, error = %report.chain(), "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(source = report.source, error = %report.chain(), "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;

    let source = match fixtures_path(&cli_args.command) {
        Some(path) => {
            let fixtures = JsonFixtureSource::load(path).await?;
            Some(Arc::new(fixtures) as Arc<dyn DataSource>)
        }
        None => None,
    };

    let stack = CacheStack::build(&settings, source)?;
    let output = commands::execute(&cli_args.command, &stack).await;
    stack.coordinator.shutdown();
    let output = output?;

    let rendered = serde_json::to_string_pretty(&output)
        .map_err(|err| AppError::unexpected(format!("failed to render output: {err}")))?;
    println!("{rendered}");

    info!(command = ?cli_args.command, "Command completed");
    Ok(())
}
