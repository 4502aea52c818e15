use clap::Args;
use deepfocus_core::storage::Database;
use serde_json::json;

use super::{print_json, CliResult};

#[derive(Args)]
pub struct StatsArgs {
    /// Also list this many of the most recent session outcomes
    #[arg(long, default_value = "0")]
    recent: usize,
}

pub fn run(args: StatsArgs) -> CliResult {
    let db = Database::open()?;
    let stats = db.stats()?;

    if args.recent == 0 {
        print_json(&stats)?;
    } else {
        let recent = db.recent_outcomes(args.recent)?;
        print_json(&json!({ "stats": stats, "recent": recent }))?;
    }
    Ok(())
}
