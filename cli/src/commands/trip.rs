use anyhow::{Result, bail};
use clap::Args;
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use wayfare_core::Session;
use wayfare_core::models::{NewTrip, UpdateTrip};

use super::helpers::{
    FilterArgs, describe_filter, opt_fmt, or_not_found, parse_amount, parse_date, truncate, usd,
};

#[derive(Args, Debug)]
pub(crate) struct TripAddArgs {
    /// Trip name
    name: String,
    /// Primary city
    #[arg(long)]
    city: String,
    /// Country
    #[arg(long)]
    country: String,
    /// Start date (YYYY-MM-DD or today/yesterday/tomorrow)
    #[arg(long)]
    start: String,
    /// End date (YYYY-MM-DD or today/yesterday/tomorrow)
    #[arg(long)]
    end: String,
    /// Total cost in USD
    #[arg(long, default_value = "0")]
    total: String,
    /// Transportation cost in USD
    #[arg(long, default_value = "0")]
    transport: String,
    /// Accommodation cost in USD
    #[arg(long, default_value = "0")]
    accommodation: String,
    /// Activities cost in USD
    #[arg(long, default_value = "0")]
    activities: String,
    /// Manual food cost in USD (itemized meals override it)
    #[arg(long, default_value = "0")]
    food: String,
    /// Latitude of the primary city
    #[arg(long, allow_hyphen_values = true)]
    lat: Option<f64>,
    /// Longitude of the primary city
    #[arg(long, allow_hyphen_values = true)]
    lon: Option<f64>,
    /// Measured internet speed in Mbps
    #[arg(long)]
    speed: Option<f64>,
}

#[derive(Args, Debug, Default)]
pub(crate) struct TripEditArgs {
    /// New trip name
    #[arg(long)]
    name: Option<String>,
    /// New primary city
    #[arg(long)]
    city: Option<String>,
    /// New country
    #[arg(long)]
    country: Option<String>,
    /// New start date
    #[arg(long)]
    start: Option<String>,
    /// New end date
    #[arg(long)]
    end: Option<String>,
    /// New total cost in USD
    #[arg(long)]
    total: Option<String>,
    /// New transportation cost in USD
    #[arg(long)]
    transport: Option<String>,
    /// New accommodation cost in USD
    #[arg(long)]
    accommodation: Option<String>,
    /// New activities cost in USD
    #[arg(long)]
    activities: Option<String>,
    /// New manual food cost in USD
    #[arg(long)]
    food: Option<String>,
    /// New latitude
    #[arg(long, allow_hyphen_values = true)]
    lat: Option<f64>,
    /// New longitude
    #[arg(long, allow_hyphen_values = true)]
    lon: Option<f64>,
}

fn amount(s: Option<&String>) -> Result<Option<Option<f64>>> {
    s.map(|v| parse_amount(v).map(Some)).transpose()
}

impl TripEditArgs {
    fn into_update(self) -> Result<UpdateTrip> {
        Ok(UpdateTrip {
            start_date: self.start.map(Some).map(parse_date).transpose()?,
            end_date: self.end.map(Some).map(parse_date).transpose()?,
            total_cost_usd: amount(self.total.as_ref())?,
            transportation_cost_usd: amount(self.transport.as_ref())?,
            accommodation_cost_usd: amount(self.accommodation.as_ref())?,
            activities_cost_usd: amount(self.activities.as_ref())?,
            food_cost_usd: amount(self.food.as_ref())?,
            trip_name: self.name,
            primary_city: self.city,
            country: self.country,
            lat: self.lat,
            lon: self.lon,
            internet_speed_mbps: None,
        })
    }
}

pub(crate) fn cmd_trip_add(session: &mut Session, args: TripAddArgs, json: bool) -> Result<()> {
    let new = NewTrip {
        start_date: parse_date(Some(args.start))?,
        end_date: parse_date(Some(args.end))?,
        total_cost_usd: parse_amount(&args.total)?,
        transportation_cost_usd: parse_amount(&args.transport)?,
        accommodation_cost_usd: parse_amount(&args.accommodation)?,
        activities_cost_usd: parse_amount(&args.activities)?,
        food_cost_usd: parse_amount(&args.food)?,
        trip_name: args.name,
        primary_city: args.city,
        country: args.country,
        lat: args.lat,
        lon: args.lon,
        internet_speed_mbps: args.speed,
    };
    let trip = session.add_trip(new)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&trip)?);
    } else {
        let id = trip.trip_id;
        let name = &trip.trip_name;
        let city = &trip.primary_city;
        let country = &trip.country;
        println!("Added trip {id}: {name} ({city}, {country})");
    }
    Ok(())
}

pub(crate) fn cmd_trip_list(session: &Session, filter: &FilterArgs, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct TripRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Trip")]
        name: String,
        #[tabled(rename = "City")]
        city: String,
        #[tabled(rename = "Country")]
        country: String,
        #[tabled(rename = "Start")]
        start: String,
        #[tabled(rename = "Days")]
        days: i64,
        #[tabled(rename = "Total")]
        total: String,
        #[tabled(rename = "Per day")]
        per_day: String,
        #[tabled(rename = "Food")]
        food: String,
        #[tabled(rename = "Mbps")]
        speed: String,
    }

    let filter = filter.to_filter();
    let trips = filter.select(&session.enriched());

    if json {
        println!("{}", serde_json::to_string_pretty(&trips)?);
        return Ok(());
    }

    if trips.is_empty() {
        eprintln!("No trips match ({})", describe_filter(&filter));
        process::exit(2);
    }

    let rows: Vec<TripRow> = trips
        .iter()
        .map(|t| TripRow {
            id: t.trip.trip_id,
            name: truncate(&t.trip.trip_name, 30),
            city: truncate(&t.trip.primary_city, 20),
            country: t.trip.country.clone(),
            start: t
                .trip
                .start_date
                .map(|d| d.to_string())
                .unwrap_or_default(),
            days: t.days,
            total: usd(t.total_cost()),
            per_day: usd(t.cost_per_day),
            food: usd(t.food_cost_final),
            speed: opt_fmt(t.trip.internet_speed_mbps, |v| format!("{v:.0}")),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(5..)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}

pub(crate) fn cmd_trip_edit(
    session: &mut Session,
    trip_id: i64,
    args: TripEditArgs,
    json: bool,
) -> Result<()> {
    let update = args.into_update()?;
    if update.is_empty() {
        bail!("Nothing to update. Provide at least one field, e.g. --total or --end");
    }
    let trip = or_not_found(session.update_trip(trip_id, &update), json)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&trip)?);
    } else {
        let name = &trip.trip_name;
        println!("Updated trip {trip_id}: {name}");
    }
    Ok(())
}

pub(crate) fn cmd_trip_delete(session: &mut Session, trip_id: i64, json: bool) -> Result<()> {
    let trip = or_not_found(session.delete_trip(trip_id), json)?;
    let orphaned = session
        .meals()
        .iter()
        .filter(|m| m.trip_id == Some(trip_id))
        .count();

    if json {
        println!(
            "{}",
            serde_json::json!({ "deleted": trip_id, "orphaned_meals": orphaned })
        );
    } else {
        let name = &trip.trip_name;
        println!("Deleted trip {trip_id}: {name}");
        if orphaned > 0 {
            eprintln!(
                "Note: {orphaned} meal(s) still reference trip {trip_id} and no longer count toward any trip"
            );
        }
    }
    Ok(())
}

pub(crate) fn cmd_trip_speed(
    session: &mut Session,
    trip_id: i64,
    mbps: Option<f64>,
    clear: bool,
    json: bool,
) -> Result<()> {
    if mbps.is_none() && !clear {
        bail!("Provide a speed in Mbps, or --clear to remove the recorded speed");
    }
    let trip = or_not_found(session.set_internet_speed(trip_id, mbps), json)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&trip)?);
    } else {
        let name = &trip.trip_name;
        match trip.internet_speed_mbps {
            Some(v) => println!("Set internet speed for {name} to {v:.1} Mbps"),
            None => println!("Cleared internet speed for {name}"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edit_args_into_update() {
        let args = TripEditArgs {
            total: Some("1,400".to_string()),
            end: Some("2023-03-25".to_string()),
            ..TripEditArgs::default()
        };
        let update = args.into_update().unwrap();
        assert_eq!(update.total_cost_usd, Some(Some(1400.0)));
        assert_eq!(
            update.end_date,
            chrono::NaiveDate::from_ymd_opt(2023, 3, 25)
        );
        assert!(update.trip_name.is_none());
        assert!(!update.is_empty());
    }

    #[test]
    fn test_edit_args_empty() {
        assert!(TripEditArgs::default().into_update().unwrap().is_empty());
    }

    #[test]
    fn test_edit_args_rejects_negative_amount() {
        let args = TripEditArgs {
            food: Some("-10".to_string()),
            ..TripEditArgs::default()
        };
        assert!(args.into_update().is_err());
    }
}
