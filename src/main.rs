use anyhow::Result;
use provision::app;
use provision::cli;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let invocation = cli::parse()?;

    let default_level = if invocation.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let exit_code = app::run(invocation)?;
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}
