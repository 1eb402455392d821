use anyhow::Result;
use clap::Parser;
use std::fs;
use toolcall_evaluations::{Args, EvalDefaults, helpers::setup_logging, run_evaluation};
use uuid::Uuid;

fn load_eval_defaults() -> Option<EvalDefaults> {
    let home = dirs::home_dir()?;
    let path = home.join(".toolcall_eval_defaults.toml");
    let content = fs::read_to_string(path).ok()?;
    toml::from_str(&content).ok()
}

fn main() -> Result<()> {
    let evaluation_run_id = Uuid::now_v7();
    let mut args = Args::parse();

    // Load defaults if any of the optional-on-CLI fields are missing
    if (args.dataset.is_none() || args.tools_file.is_none() || args.test_ratio.is_none())
        && let Some(defaults) = load_eval_defaults()
    {
        args.apply_defaults(defaults);
    }

    let mut writer = std::io::stdout();
    setup_logging(&args)?;
    run_evaluation(args, evaluation_run_id, &mut writer)
}
