use anyhow::{Context, Result};
use clap::ValueEnum;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

use wayfare_core::Session;
use wayfare_core::csv_io;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum TableArg {
    Trips,
    Meals,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum ExportArg {
    Trips,
    Meals,
    /// Trips plus derived columns (days, cost per day, reconciled food cost, year)
    Enriched,
}

impl TableArg {
    fn label(self) -> &'static str {
        match self {
            Self::Trips => "trips",
            Self::Meals => "meals",
        }
    }
}

/// Replace a table with the contents of a CSV file. A schema or id error
/// leaves the saved table untouched.
pub(crate) fn cmd_import(
    session: &mut Session,
    table: TableArg,
    file: &Path,
    json: bool,
) -> Result<()> {
    let reader = BufReader::new(
        File::open(file).with_context(|| format!("Failed to open {}", file.display()))?,
    );
    let count = match table {
        TableArg::Trips => session.load_trips_csv(reader),
        TableArg::Meals => session.load_meals_csv(reader),
    }
    .with_context(|| format!("Failed to import {}", file.display()))?;

    let label = table.label();
    if json {
        println!(
            "{}",
            serde_json::json!({ "table": label, "rows": count })
        );
    } else {
        println!("Imported {count} {label} from {}", file.display());
    }
    Ok(())
}

/// Write a table to `file`, or stdout when no file is given.
pub(crate) fn cmd_export(
    session: &Session,
    table: ExportArg,
    file: Option<&Path>,
    json: bool,
) -> Result<()> {
    let Some(path) = file else {
        return write_export(session, table, io::stdout().lock(), json);
    };
    let out = BufWriter::new(
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
    );
    write_export(session, table, out, json)?;
    eprintln!("Exported to {}", path.display());
    Ok(())
}

fn write_export<W: Write>(
    session: &Session,
    table: ExportArg,
    mut out: W,
    json: bool,
) -> Result<()> {
    if json {
        match table {
            ExportArg::Trips => serde_json::to_writer_pretty(&mut out, session.trips())?,
            ExportArg::Meals => serde_json::to_writer_pretty(&mut out, session.meals())?,
            ExportArg::Enriched => serde_json::to_writer_pretty(&mut out, &session.enriched())?,
        }
        writeln!(out)?;
        return Ok(());
    }
    match table {
        ExportArg::Trips => csv_io::write_trips_csv(out, session.trips())?,
        ExportArg::Meals => csv_io::write_meals_csv(out, session.meals())?,
        ExportArg::Enriched => csv_io::write_enriched_csv(out, &session.enriched())?,
    }
    Ok(())
}

/// Print a one-row example file for the given table.
pub(crate) fn cmd_template(table: TableArg, json: bool) -> Result<()> {
    match (table, json) {
        (TableArg::Trips, false) => {
            csv_io::write_trips_csv(io::stdout().lock(), &[csv_io::template_trip()])?;
        }
        (TableArg::Meals, false) => {
            csv_io::write_meals_csv(io::stdout().lock(), &[csv_io::template_meal()])?;
        }
        (TableArg::Trips, true) => {
            println!("{}", serde_json::to_string_pretty(&[csv_io::template_trip()])?);
        }
        (TableArg::Meals, true) => {
            println!("{}", serde_json::to_string_pretty(&[csv_io::template_meal()])?);
        }
    }
    Ok(())
}

pub(crate) fn cmd_clear(session: &mut Session, table: TableArg, json: bool) -> Result<()> {
    let removed = match table {
        TableArg::Trips => session.clear_trips(),
        TableArg::Meals => session.clear_meals(),
    };
    let label = table.label();
    if json {
        println!(
            "{}",
            serde_json::json!({ "table": label, "removed": removed })
        );
    } else {
        println!("Cleared {removed} {label}");
    }
    Ok(())
}
