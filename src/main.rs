use anyhow::anyhow;
use clap::{Args, Parser, Subcommand};
use log::info;
use picklab::{
    commands::{compare, detect_lessons, run_backtest, track},
    config::BacktestParams,
    context::AppContext,
};
use std::env;

#[derive(Parser)]
#[command(name = "picklab")]
#[command(about = "Pick-to-outcome simulation and analytics engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RuleArgs {
    /// Take-profit threshold in percent (999 disables)
    #[arg(long, default_value_t = 10.0)]
    target: f64,
    /// Stop-loss threshold in percent (999 disables)
    #[arg(long, default_value_t = 7.0)]
    stop: f64,
    /// Maximum holding period in days
    #[arg(long = "max-hold", default_value_t = 90)]
    max_hold: i64,
    /// Starting simulated capital
    #[arg(long, default_value_t = 100_000.0)]
    capital: f64,
    /// Transaction fee on exit notional, in percent
    #[arg(long, default_value_t = 0.1)]
    fee: f64,
    /// Share of current capital committed per trade, in percent
    #[arg(long = "position-size", default_value_t = 10.0)]
    position_size: f64,
}

impl RuleArgs {
    fn into_params(self, algorithm_filter: Option<String>) -> BacktestParams {
        BacktestParams {
            target_pct: self.target,
            stop_pct: self.stop,
            max_hold_days: self.max_hold,
            initial_capital: self.capital,
            fee_pct: self.fee,
            position_size_pct: self.position_size,
            algorithm_filter,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Replay historical picks through the exit rules and report run metrics
    RunBacktest {
        #[command(flatten)]
        rules: RuleArgs,
        /// Restrict the run to one algorithm
        #[arg(long)]
        algorithm: Option<String>,
    },
    /// Import new picks, refresh open positions and write today's snapshot
    Track,
    /// Mine the closed-trade population for confidence-scored lessons
    DetectLessons,
    /// Rank named presets or algorithms by backtest outcome
    Compare {
        #[command(flatten)]
        rules: RuleArgs,
        /// Comma separated preset names (all presets when omitted)
        #[arg(long, value_delimiter = ',', num_args = 0..)]
        presets: Vec<String>,
        /// Comma separated algorithm names to compare under fixed rules
        #[arg(long, value_delimiter = ',', num_args = 0..)]
        algorithms: Vec<String>,
        /// Persist each comparison run instead of discarding them
        #[arg(long)]
        save: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let database_url = env::var("DATABASE_URL").ok();
    if database_url.is_none() {
        return Err(anyhow!("DATABASE_URL must be set for picklab commands."));
    }
    let app_context = AppContext::initialize(database_url).await?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Starting picklab. Simulated results only; not financial advice.");

    match cli.command {
        Commands::RunBacktest { rules, algorithm } => {
            run_backtest::run(&app_context, rules.into_params(algorithm)).await?;
        }
        Commands::Track => {
            track::run(&app_context).await?;
        }
        Commands::DetectLessons => {
            detect_lessons::run(&app_context).await?;
        }
        Commands::Compare {
            rules,
            presets,
            algorithms,
            save,
        } => {
            compare::run(
                &app_context,
                rules.into_params(None),
                presets,
                algorithms,
                save,
            )
            .await?;
        }
    }

    Ok(())
}
