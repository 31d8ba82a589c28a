use anyhow::Result;
use clap::{CommandFactory, Parser};
use pbs_query::{
    client::PbsClient,
    config::{self, CliArgs, EnvDefaults},
};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            match e.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                    std::process::exit(0)
                }
                // Bad invocations exit 1, not clap's default 2
                _ => std::process::exit(1),
            }
        }
    };

    init_logging();

    let Some(mode) = args.mode else {
        eprintln!("Missing mode");
        eprintln!("{}", CliArgs::command().render_help());
        std::process::exit(1);
    };

    let env = EnvDefaults::from_process_env();
    let settings = config::resolve(&args, &env)?;
    debug!("Resolved configuration: {:?}", settings);

    let exclude = args.exclusion_set();
    let client = PbsClient::connect(&settings).await?;

    let document = mode.run(&client, &exclude).await?;
    println!("{}", serde_json::to_string(&document)?);

    Ok(())
}

/// Initialize structured logging with tracing.
///
/// Diagnostics go to stderr; stdout carries only the JSON document.
fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
