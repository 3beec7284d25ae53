use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = harvestctl::Cli::parse();
    if let Err(err) = harvestctl::run(cli) {
        eprintln!("erro: {err}");
        std::process::exit(1);
    }
}
