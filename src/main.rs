use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = fulcrum::cli::Cli::parse();
    if let Err(e) = fulcrum::cmd::dispatch(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
