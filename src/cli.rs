use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "log-threshold-rs",
    version,
    about = "Log threshold alert evaluator"
)]
pub struct Args {
    /// Rules file; overrides LOG_THRESHOLD_RULES_PATH.
    #[arg(long)]
    pub rules: Option<PathBuf>,
    /// Evaluate every rule once and exit.
    #[arg(long, default_value_t = false)]
    pub once: bool,
}
