mod cli;
mod logging;

use clap::Parser;
use sqlite_worker::{adapters::bridge, DbError, DbResult};

use crate::cli::Args;

fn main() -> DbResult<()> {
    let args = Args::parse();
    logging::init(&args.log_level);

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| DbError::Internal(e.to_string()))?;

    rt.block_on(async move {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        bridge::run(args.engine_options(), stdin, tokio::io::stdout()).await
    })
}
