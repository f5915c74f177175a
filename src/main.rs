use clap::Parser;
use std::error::Error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args = bilidown::cli::Args::parse();

    let filter = if args.debug {
        EnvFilter::new("bilidown=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bilidown=info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = bilidown::cli::run(&args).await {
        eprintln!("{}", e);
        if args.verbose {
            let mut source = e.source();
            while let Some(s) = source {
                eprintln!("  cause: {}", s);
                source = s.source();
            }
        }
        std::process::exit(e.exit_code());
    }
}
