//! Flat-file persistence: the session's two tables as `trips.csv` and `meals.csv`
//! in the data directory.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::debug;

use wayfare_core::Session;
use wayfare_core::csv_io;

use crate::config::Config;

/// Load the saved session. Missing files mean empty tables.
pub fn load(config: &Config) -> Result<Session> {
    let mut session = Session::new();
    let trips_path = config.trips_path();
    if trips_path.exists() {
        let file = open(&trips_path)?;
        session
            .load_trips_csv(file)
            .with_context(|| format!("Failed to load {}", trips_path.display()))?;
    }
    let meals_path = config.meals_path();
    if meals_path.exists() {
        let file = open(&meals_path)?;
        session
            .load_meals_csv(file)
            .with_context(|| format!("Failed to load {}", meals_path.display()))?;
    }
    debug!(
        trips = session.trips().len(),
        meals = session.meals().len(),
        dir = %config.data_dir.display(),
        "loaded session"
    );
    Ok(session)
}

/// Write both tables back. Each file is written to a sibling temp path and
/// renamed over the old one.
pub fn save(config: &Config, session: &Session) -> Result<()> {
    write_atomic(&config.trips_path(), |w| {
        csv_io::write_trips_csv(w, session.trips())
    })?;
    write_atomic(&config.meals_path(), |w| {
        csv_io::write_meals_csv(w, session.meals())
    })?;
    Ok(())
}

fn open(path: &Path) -> Result<File> {
    File::open(path).with_context(|| format!("Failed to open {}", path.display()))
}

fn write_atomic(
    path: &Path,
    write: impl FnOnce(BufWriter<&File>) -> wayfare_core::Result<()>,
) -> Result<()> {
    let tmp = path.with_extension("csv.tmp");
    {
        let file =
            File::create(&tmp).with_context(|| format!("Failed to write {}", tmp.display()))?;
        write(BufWriter::new(&file))
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use wayfare_core::models::{NewMeal, NewTrip};

    fn config(dir: &Path) -> Config {
        Config::load(Some(dir.to_path_buf())).unwrap()
    }

    #[test]
    fn test_missing_files_load_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let session = load(&config(tmp.path())).unwrap();
        assert!(session.trips().is_empty());
        assert!(session.meals().is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config(tmp.path());
        let mut session = Session::new();
        let trip = session
            .add_trip(NewTrip {
                trip_name: "Lisbon Remote Month".to_string(),
                primary_city: "Lisbon".to_string(),
                country: "Portugal".to_string(),
                start_date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
                end_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                lat: Some(38.72),
                lon: Some(-9.14),
                total_cost_usd: 2900.0,
                transportation_cost_usd: 700.0,
                accommodation_cost_usd: 1500.0,
                activities_cost_usd: 200.0,
                food_cost_usd: 500.0,
                internet_speed_mbps: Some(80.0),
            })
            .unwrap();
        session
            .add_meal(NewMeal {
                trip_id: trip.trip_id,
                date: NaiveDate::from_ymd_opt(2024, 2, 3).unwrap(),
                cuisine: "Portuguese".to_string(),
                restaurant: "Time Out Market".to_string(),
                dish_name: "Bacalhau".to_string(),
                rating_1_10: 8,
                cost_usd: 22.0,
            })
            .unwrap();

        save(&config, &session).unwrap();
        assert!(config.trips_path().exists());
        assert!(!config.trips_path().with_extension("csv.tmp").exists());

        let reloaded = load(&config).unwrap();
        assert_eq!(reloaded.trips(), session.trips());
        assert_eq!(reloaded.meals(), session.meals());
        assert_eq!(reloaded.enriched()[0].food_cost_final, 22.0);
    }

    #[test]
    fn test_corrupt_file_reports_path() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config(tmp.path());
        std::fs::write(config.trips_path(), "trip_id,name\n1,x\n").unwrap();
        let err = load(&config).unwrap_err();
        assert!(format!("{err:#}").contains("trips.csv"));
    }
}
