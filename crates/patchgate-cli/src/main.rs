//! patchgate - admission-time patch directives for Kubernetes

use clap::{Parser, Subcommand, ValueEnum};
use miette::Result;
use tracing_subscriber::EnvFilter;

mod commands;
mod error;
mod exit_codes;

use commands::render::RenderArgs;
use commands::serve::ServeArgs;

#[derive(Parser)]
#[command(name = "patchgate")]
#[command(author = "patchgate Contributors")]
#[command(version)]
#[command(about = "Mutating admission webhook that applies templated patch directives", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text, env = "PATCHGATE_LOG_FORMAT")]
    log_format: LogFormat,

    /// Enable debug output
    #[arg(long, global = true, env = "PATCHGATE_DEBUG")]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the admission webhook
    Serve(ServeArgs),

    /// Apply an object's patch directive locally and print the result
    Render(RenderArgs),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// `RUST_LOG` wins; otherwise `patchgate=info` (or `debug` with `--debug`)
fn init_tracing(format: LogFormat, debug: bool) {
    let default = if debug { "patchgate=debug" } else { "patchgate=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup miette for nice error display
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.log_format, cli.debug);

    let result = match cli.command {
        Commands::Serve(args) => commands::serve::run(args).await,
        Commands::Render(args) => commands::render::run(&args),
    };

    if let Err(err) = result {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }

    Ok(())
}
