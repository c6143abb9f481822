use clap::Parser;
use importkit::cli::{self, Cli};
use log::{LevelFilter, error};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .filter_module("sqlx::query", LevelFilter::Info) // 只让 sqlx 输出 info 级别以上
        .init();

    if let Err(e) = cli::run(cli).await {
        error!("{}", e);
        std::process::exit(1);
    }
}
