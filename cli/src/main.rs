mod commands;
mod config;
mod server;
mod store;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::{
    ExportArg, FilterArgs, MealAddArgs, MealEditArgs, TableArg, TripAddArgs, TripEditArgs,
    cmd_clear, cmd_connectivity, cmd_export, cmd_food, cmd_import, cmd_leaderboard, cmd_meal_add,
    cmd_meal_delete, cmd_meal_edit, cmd_meal_list, cmd_summary, cmd_template, cmd_trip_add,
    cmd_trip_delete, cmd_trip_edit, cmd_trip_list, cmd_trip_speed, cmd_workability,
};
use crate::config::Config;

#[derive(Parser)]
#[command(
    name = "wayfare",
    version,
    about = "Travel spending, food and remote-work dashboard",
    long_about = "Track trips and the meals eaten on them, then compare destinations by \
cost per day, food ratings and how workable they are for remote work."
)]
struct Cli {
    /// Directory holding trips.csv and meals.csv (overrides WAYFARE_DATA_DIR)
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage trips
    Trip {
        #[command(subcommand)]
        command: TripCommands,
    },
    /// Manage meals logged against trips
    Meal {
        #[command(subcommand)]
        command: MealCommands,
    },
    /// Replace a table with the rows of a CSV file
    Import {
        /// Table to replace
        #[arg(value_enum)]
        table: TableArg,
        /// CSV file to read
        file: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Export a table as CSV (or JSON with --json)
    Export {
        /// Table to export
        #[arg(value_enum)]
        table: ExportArg,
        /// Output file (default: stdout)
        file: Option<PathBuf>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print an example file showing the expected columns
    Template {
        #[arg(value_enum)]
        table: TableArg,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove every row of a table
    Clear {
        #[arg(value_enum)]
        table: TableArg,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Headline metrics for the selected trips
    Summary {
        #[command(flatten)]
        filter: FilterArgs,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Trips ranked by cost per day, cheapest first
    Leaderboard {
        #[command(flatten)]
        filter: FilterArgs,
        /// Only show the first N trips
        #[arg(short, long)]
        top: Option<usize>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Best destinations for remote work (internet speed and affordability)
    Workability {
        #[command(flatten)]
        filter: FilterArgs,
        /// Number of trips to show
        #[arg(short, long, default_value = "5")]
        top: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Internet speed statistics
    Connectivity {
        #[command(flatten)]
        filter: FilterArgs,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Meal ratings by cuisine and by trip
    Food {
        #[command(flatten)]
        filter: FilterArgs,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Start the REST API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
    },
}

#[derive(Subcommand)]
enum TripCommands {
    /// Add a trip
    Add {
        #[command(flatten)]
        args: TripAddArgs,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List trips with their derived columns
    List {
        #[command(flatten)]
        filter: FilterArgs,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit fields of a trip
    Edit {
        /// Trip ID
        id: i64,
        #[command(flatten)]
        args: TripEditArgs,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a trip (its meals are kept)
    Delete {
        /// Trip ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Record the measured internet speed of a trip
    Speed {
        /// Trip ID
        id: i64,
        /// Download speed in Mbps
        mbps: Option<f64>,
        /// Remove the recorded speed
        #[arg(long, conflicts_with = "mbps")]
        clear: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum MealCommands {
    /// Log a meal against a trip
    Add {
        #[command(flatten)]
        args: MealAddArgs,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List meals
    List {
        /// Only meals of this trip
        #[arg(long)]
        trip: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit fields of a meal
    Edit {
        /// Meal ID
        id: i64,
        #[command(flatten)]
        args: MealEditArgs,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a meal
    Delete {
        /// Meal ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Commands {
    fn is_serve(&self) -> bool {
        matches!(self, Self::Serve { .. })
    }
}

/// Log to stderr so stdout stays clean for tables, CSV and JSON.
fn init_tracing(serve: bool) {
    let default = if serve {
        "wayfare=info,wayfare_core=info,tower_http=info"
    } else {
        "wayfare=warn,wayfare_core=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.command.is_serve());

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.data_dir)?;
    let mut session = store::load(&config)?;

    let mutated = match cli.command {
        Commands::Trip { command } => match command {
            TripCommands::Add { args, json } => {
                cmd_trip_add(&mut session, args, json)?;
                true
            }
            TripCommands::List { filter, json } => {
                cmd_trip_list(&session, &filter, json)?;
                false
            }
            TripCommands::Edit { id, args, json } => {
                cmd_trip_edit(&mut session, id, args, json)?;
                true
            }
            TripCommands::Delete { id, json } => {
                cmd_trip_delete(&mut session, id, json)?;
                true
            }
            TripCommands::Speed {
                id,
                mbps,
                clear,
                json,
            } => {
                cmd_trip_speed(&mut session, id, mbps, clear, json)?;
                true
            }
        },
        Commands::Meal { command } => match command {
            MealCommands::Add { args, json } => {
                cmd_meal_add(&mut session, args, json)?;
                true
            }
            MealCommands::List { trip, json } => {
                cmd_meal_list(&session, trip, json)?;
                false
            }
            MealCommands::Edit { id, args, json } => {
                cmd_meal_edit(&mut session, id, args, json)?;
                true
            }
            MealCommands::Delete { id, json } => {
                cmd_meal_delete(&mut session, id, json)?;
                true
            }
        },
        Commands::Import { table, file, json } => {
            cmd_import(&mut session, table, &file, json)?;
            true
        }
        Commands::Export { table, file, json } => {
            cmd_export(&session, table, file.as_deref(), json)?;
            false
        }
        Commands::Template { table, json } => {
            cmd_template(table, json)?;
            false
        }
        Commands::Clear { table, json } => {
            cmd_clear(&mut session, table, json)?;
            true
        }
        Commands::Summary { filter, json } => {
            cmd_summary(&session, &filter, json)?;
            false
        }
        Commands::Leaderboard { filter, top, json } => {
            cmd_leaderboard(&session, &filter, top, json)?;
            false
        }
        Commands::Workability { filter, top, json } => {
            cmd_workability(&session, &filter, top, json)?;
            false
        }
        Commands::Connectivity { filter, json } => {
            cmd_connectivity(&session, &filter, json)?;
            false
        }
        Commands::Food { filter, json } => {
            cmd_food(&session, &filter, json)?;
            false
        }
        Commands::Serve { port, bind } => {
            return server::start_server(config, session, port, &bind).await;
        }
    };

    if mutated {
        store::save(&config, &session)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_filtered_workability() {
        let cli = Cli::try_parse_from([
            "wayfare",
            "workability",
            "--country",
            "Japan",
            "--country",
            "Portugal",
            "--year",
            "2024",
            "--top",
            "3",
        ])
        .unwrap();
        let Commands::Workability { filter, top, .. } = cli.command else {
            panic!("expected workability");
        };
        assert_eq!(top, 3);
        let filter = filter.to_filter();
        assert_eq!(filter.countries.unwrap().len(), 2);
        assert!(filter.years.unwrap().contains(&2024));
    }

    #[test]
    fn test_speed_value_and_clear_conflict() {
        let result = Cli::try_parse_from(["wayfare", "trip", "speed", "1", "40", "--clear"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_global_data_dir() {
        let cli = Cli::try_parse_from(["wayfare", "summary", "--data-dir", "/tmp/wf"]).unwrap();
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/wf")));
    }
}
