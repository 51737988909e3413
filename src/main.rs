// src/main.rs

use opgraph::dag::OperationStatus;
use opgraph::{cli, logging, run};

#[tokio::main]
async fn main() {
    match run_main().await {
        Ok(OperationStatus::Failure) => std::process::exit(1),
        Ok(_) => {}
        Err(err) => {
            eprintln!("opgraph error: {err:?}");
            std::process::exit(1);
        }
    }
}

async fn run_main() -> anyhow::Result<OperationStatus> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;
    run(args).await
}
