use std::collections::HashSet;
use std::io::{Read, Write};

use chrono::NaiveDate;
use csv::StringRecord;
use tracing::debug;

use crate::error::{Error, Result, Table};
use crate::models::{EnrichedTrip, MAX_RATING, MIN_RATING, Meal, Trip, next_id};

pub const TRIP_COLUMNS: [&str; 14] = [
    "trip_id",
    "trip_name",
    "start_date",
    "end_date",
    "primary_city",
    "country",
    "lat",
    "lon",
    "total_cost_usd",
    "transportation_cost_usd",
    "accommodation_cost_usd",
    "activities_cost_usd",
    "food_cost_usd",
    "internet_speed_mbps",
];

pub const MEAL_COLUMNS: [&str; 8] = [
    "meal_id",
    "trip_id",
    "date",
    "cuisine",
    "restaurant",
    "dish_name",
    "rating_1_10",
    "cost_usd",
];

const REQUIRED_TRIP_COLUMNS: [&str; 7] = [
    "trip_id",
    "trip_name",
    "start_date",
    "end_date",
    "primary_city",
    "country",
    "total_cost_usd",
];

const REQUIRED_MEAL_COLUMNS: [&str; 3] = ["meal_id", "trip_id", "cost_usd"];

/// Column lookup over a header row, case-insensitive.
struct Columns {
    headers: StringRecord,
}

impl Columns {
    fn new(headers: StringRecord, table: Table, required: &[&str]) -> Result<Self> {
        let cols = Self { headers };
        for name in required {
            if cols.index(name).is_none() {
                return Err(Error::Schema {
                    table,
                    column: (*name).to_string(),
                });
            }
        }
        Ok(cols)
    }

    fn index(&self, name: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
    }
}

/// One data row with lenient accessors. Anything unparseable reads as absent.
struct Row<'a> {
    record: &'a StringRecord,
    cols: &'a Columns,
}

impl Row<'_> {
    fn text(&self, name: &str) -> Option<&str> {
        let idx = self.cols.index(name)?;
        let v = self.record.get(idx)?.trim();
        if v.is_empty() { None } else { Some(v) }
    }

    fn string(&self, name: &str) -> String {
        self.text(name).unwrap_or_default().to_string()
    }

    fn number(&self, name: &str) -> Option<f64> {
        self.text(name)
            .and_then(|v| v.replace(',', "").trim_start_matches('$').parse::<f64>().ok())
            .filter(|v| v.is_finite())
    }

    /// Integer id; floats like `3.0` are accepted since spreadsheets often write them.
    fn id(&self, name: &str) -> Option<i64> {
        let raw = self.text(name)?;
        if let Ok(v) = raw.parse::<i64>() {
            return Some(v);
        }
        let v = raw.parse::<f64>().ok()?;
        #[allow(clippy::cast_precision_loss)]
        let in_range = v.is_finite() && v.fract() == 0.0 && v.abs() < i64::MAX as f64;
        in_range.then_some(v as i64)
    }

    fn date(&self, name: &str) -> Option<NaiveDate> {
        self.text(name).and_then(parse_date)
    }

    fn is_blank(&self) -> bool {
        self.record.iter().all(|v| v.trim().is_empty())
    }
}

/// Parse a calendar date as written by spreadsheets and dataframe exports.
///
/// Accepts `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS` and `M/D/YYYY`.
#[must_use]
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    if let Some(prefix) = s.get(..10) {
        if s.len() > 10 && matches!(s.as_bytes()[10], b' ' | b'T') {
            if let Ok(d) = NaiveDate::parse_from_str(prefix, "%Y-%m-%d") {
                return Some(d);
            }
        }
    }
    NaiveDate::parse_from_str(s, "%m/%d/%Y").ok()
}

fn reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader)
}

/// Give rows without a usable id the next free one, rejecting duplicates.
fn assign_ids(ids: &mut [Option<i64>], table: Table) -> Result<Vec<i64>> {
    let mut seen = HashSet::new();
    for (line, id) in ids.iter_mut().enumerate() {
        if let Some(v) = *id {
            if v <= 0 {
                *id = None;
            } else if !seen.insert(v) {
                return Err(Error::validation(format!(
                    "Duplicate id {v} in {table} upload (row {})",
                    line + 2
                )));
            }
        }
    }
    let mut next = next_id(seen.iter().copied());
    Ok(ids
        .iter()
        .map(|id| {
            id.unwrap_or_else(|| {
                let v = next;
                next += 1;
                v
            })
        })
        .collect())
}

/// Parse an uploaded trips table.
///
/// Missing required columns fail with [`Error::Schema`]; messy cell values are
/// coerced instead of rejected.
pub fn parse_trips_csv<R: Read>(input: R) -> Result<Vec<Trip>> {
    let mut rdr = reader(input);
    let cols = Columns::new(rdr.headers()?.clone(), Table::Trips, &REQUIRED_TRIP_COLUMNS)?;

    let mut trips = Vec::new();
    let mut ids = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let row = Row {
            record: &record,
            cols: &cols,
        };
        if row.is_blank() {
            continue;
        }
        ids.push(row.id("trip_id"));
        trips.push(Trip {
            trip_id: 0,
            trip_name: row.string("trip_name"),
            start_date: row.date("start_date"),
            end_date: row.date("end_date"),
            primary_city: row.string("primary_city"),
            country: row.string("country"),
            lat: row.number("lat").unwrap_or(0.0),
            lon: row.number("lon").unwrap_or(0.0),
            total_cost_usd: row.number("total_cost_usd"),
            transportation_cost_usd: row.number("transportation_cost_usd"),
            accommodation_cost_usd: row.number("accommodation_cost_usd"),
            activities_cost_usd: row.number("activities_cost_usd"),
            food_cost_usd: row.number("food_cost_usd"),
            internet_speed_mbps: row.number("internet_speed_mbps"),
        });
    }

    for (trip, id) in trips.iter_mut().zip(assign_ids(&mut ids, Table::Trips)?) {
        trip.trip_id = id;
    }
    debug!(rows = trips.len(), "parsed trips table");
    Ok(trips)
}

/// Parse an uploaded meals table. Ratings outside 1–10 and non-integer trip
/// references read as absent; non-numeric costs read as 0.
pub fn parse_meals_csv<R: Read>(input: R) -> Result<Vec<Meal>> {
    let mut rdr = reader(input);
    let cols = Columns::new(rdr.headers()?.clone(), Table::Meals, &REQUIRED_MEAL_COLUMNS)?;

    let mut meals = Vec::new();
    let mut ids = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let row = Row {
            record: &record,
            cols: &cols,
        };
        if row.is_blank() {
            continue;
        }
        ids.push(row.id("meal_id"));
        let rating = row
            .id("rating_1_10")
            .and_then(|r| u8::try_from(r).ok())
            .filter(|r| (MIN_RATING..=MAX_RATING).contains(r));
        meals.push(Meal {
            meal_id: 0,
            trip_id: row.id("trip_id"),
            date: row.date("date"),
            cuisine: row.string("cuisine"),
            restaurant: row.string("restaurant"),
            dish_name: row.string("dish_name"),
            rating_1_10: rating,
            cost_usd: row.number("cost_usd").unwrap_or(0.0),
        });
    }

    for (meal, id) in meals.iter_mut().zip(assign_ids(&mut ids, Table::Meals)?) {
        meal.meal_id = id;
    }
    debug!(rows = meals.len(), "parsed meals table");
    Ok(meals)
}

fn opt_num(v: Option<f64>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}

fn opt_date(v: Option<NaiveDate>) -> String {
    v.map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

fn trip_fields(t: &Trip) -> Vec<String> {
    vec![
        t.trip_id.to_string(),
        t.trip_name.clone(),
        opt_date(t.start_date),
        opt_date(t.end_date),
        t.primary_city.clone(),
        t.country.clone(),
        t.lat.to_string(),
        t.lon.to_string(),
        opt_num(t.total_cost_usd),
        opt_num(t.transportation_cost_usd),
        opt_num(t.accommodation_cost_usd),
        opt_num(t.activities_cost_usd),
        opt_num(t.food_cost_usd),
        opt_num(t.internet_speed_mbps),
    ]
}

pub fn write_trips_csv<W: Write>(out: W, trips: &[Trip]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(out);
    wtr.write_record(TRIP_COLUMNS)?;
    for t in trips {
        wtr.write_record(trip_fields(t))?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_meals_csv<W: Write>(out: W, meals: &[Meal]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(out);
    wtr.write_record(MEAL_COLUMNS)?;
    for m in meals {
        wtr.write_record([
            m.meal_id.to_string(),
            m.trip_id.map(|v| v.to_string()).unwrap_or_default(),
            opt_date(m.date),
            m.cuisine.clone(),
            m.restaurant.clone(),
            m.dish_name.clone(),
            m.rating_1_10.map(|v| v.to_string()).unwrap_or_default(),
            m.cost_usd.to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Trips table plus the derived columns, for spreadsheet hand-off.
pub fn write_enriched_csv<W: Write>(out: W, trips: &[EnrichedTrip]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(out);
    let mut header: Vec<&str> = TRIP_COLUMNS.to_vec();
    header.extend([
        "days",
        "cost_per_day",
        "food_cost_from_meals",
        "food_cost_final",
        "year",
    ]);
    wtr.write_record(&header)?;
    for t in trips {
        let mut fields = trip_fields(&t.trip);
        fields.extend([
            t.days.to_string(),
            format!("{:.2}", t.cost_per_day),
            opt_num(t.food_cost_from_meals),
            t.food_cost_final.to_string(),
            t.year.map(|y| y.to_string()).unwrap_or_default(),
        ]);
        wtr.write_record(&fields)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Example trip row offered as a fill-in template.
#[must_use]
pub fn template_trip() -> Trip {
    Trip {
        trip_id: 1,
        trip_name: "Tokyo Spring Break".to_string(),
        start_date: NaiveDate::from_ymd_opt(2023, 3, 15),
        end_date: NaiveDate::from_ymd_opt(2023, 3, 22),
        primary_city: "Tokyo".to_string(),
        country: "Japan".to_string(),
        lat: 35.6895,
        lon: 139.6917,
        total_cost_usd: Some(2000.0),
        transportation_cost_usd: Some(600.0),
        accommodation_cost_usd: Some(800.0),
        activities_cost_usd: Some(250.0),
        food_cost_usd: Some(300.0),
        internet_speed_mbps: Some(45.0),
    }
}

#[must_use]
pub fn template_meal() -> Meal {
    Meal {
        meal_id: 1,
        trip_id: Some(1),
        date: NaiveDate::from_ymd_opt(2023, 3, 16),
        cuisine: "Japanese".to_string(),
        restaurant: "Ichiran".to_string(),
        dish_name: "Tonkotsu Ramen".to_string(),
        rating_1_10: Some(9),
        cost_usd: 12.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE_TRIPS: &str = "\
trip_id,trip_name,start_date,end_date,primary_city,country,lat,lon,total_cost_usd,transportation_cost_usd,accommodation_cost_usd,activities_cost_usd,food_cost_usd,internet_speed_mbps
1,Tokyo Spring Break,2023-03-15,2023-03-22,Tokyo,Japan,35.6895,139.6917,2000,600,800,250,300,45
2,Lisbon Workation,2024-02-01 00:00:00,2024-02-15 00:00:00,Lisbon,Portugal,38.72,-9.14,\"1,850\",400,900,,,
";

    const SAMPLE_MEALS: &str = "\
meal_id,trip_id,date,cuisine,restaurant,dish_name,rating_1_10,cost_usd
1,1,2023-03-16,Japanese,Ichiran,Tonkotsu Ramen,9,12
2,1,2023-03-17,Japanese,Sukiyabashi,Sushi,10,18
3,abc,2023-03-18,Thai,Somewhere,Pad Thai,11,oops
";

    #[test]
    fn test_parse_trips_basic() {
        let trips = parse_trips_csv(SAMPLE_TRIPS.as_bytes()).unwrap();
        assert_eq!(trips.len(), 2);
        assert_eq!(trips[0], template_trip());

        let lisbon = &trips[1];
        assert_eq!(lisbon.trip_id, 2);
        assert_eq!(lisbon.start_date, NaiveDate::from_ymd_opt(2024, 2, 1));
        assert_eq!(lisbon.total_cost_usd, Some(1850.0));
        assert_eq!(lisbon.activities_cost_usd, None);
        assert_eq!(lisbon.internet_speed_mbps, None);
    }

    #[test]
    fn test_parse_trips_missing_required_column() {
        let csv = "trip_id,trip_name,start_date,end_date,primary_city,country\n1,A,,,B,C\n";
        let err = parse_trips_csv(csv.as_bytes()).unwrap_err();
        match err {
            Error::Schema { table, column } => {
                assert_eq!(table, Table::Trips);
                assert_eq!(column, "total_cost_usd");
            }
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_trips_optional_columns_absent() {
        let csv = "\
Trip_ID,trip_name,start_date,end_date,primary_city,country,total_cost_usd
7,Quito,2024-01-01,2024-01-03,Quito,Ecuador,300
";
        let trips = parse_trips_csv(csv.as_bytes()).unwrap();
        assert_eq!(trips[0].trip_id, 7);
        assert_eq!(trips[0].lat, 0.0);
        assert_eq!(trips[0].food_cost_usd, None);
    }

    #[test]
    fn test_parse_trips_coerces_bad_values() {
        let csv = "\
trip_id,trip_name,start_date,end_date,primary_city,country,total_cost_usd,internet_speed_mbps
x,Broken,not-a-date,3/20/2024,Nowhere,Narnia,lots,fast
";
        let trips = parse_trips_csv(csv.as_bytes()).unwrap();
        assert_eq!(trips[0].trip_id, 1);
        assert_eq!(trips[0].start_date, None);
        assert_eq!(trips[0].end_date, NaiveDate::from_ymd_opt(2024, 3, 20));
        assert_eq!(trips[0].total_cost_usd, None);
        assert_eq!(trips[0].internet_speed_mbps, None);
    }

    #[test]
    fn test_parse_trips_allocates_missing_ids_after_max() {
        let csv = "\
trip_id,trip_name,start_date,end_date,primary_city,country,total_cost_usd
,A,,,a,X,1
4,B,,,b,X,1
-2,C,,,c,X,1
";
        let trips = parse_trips_csv(csv.as_bytes()).unwrap();
        let ids: Vec<i64> = trips.iter().map(|t| t.trip_id).collect();
        assert_eq!(ids, vec![5, 4, 6]);
    }

    #[test]
    fn test_parse_trips_duplicate_ids_rejected() {
        let csv = "\
trip_id,trip_name,start_date,end_date,primary_city,country,total_cost_usd
1,A,,,a,X,1
1.0,B,,,b,X,1
";
        let err = parse_trips_csv(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("Duplicate id 1"));
    }

    #[test]
    fn test_parse_trips_skips_blank_rows() {
        let csv = "\
trip_id,trip_name,start_date,end_date,primary_city,country,total_cost_usd
1,A,,,a,X,1
,,,,,,
";
        assert_eq!(parse_trips_csv(csv.as_bytes()).unwrap().len(), 1);
    }

    #[test]
    fn test_parse_meals_coercion() {
        let meals = parse_meals_csv(SAMPLE_MEALS.as_bytes()).unwrap();
        assert_eq!(meals.len(), 3);
        assert_eq!(meals[0], template_meal());
        assert_eq!(meals[1].rating_1_10, Some(10));

        let bad = &meals[2];
        assert_eq!(bad.trip_id, None);
        assert_eq!(bad.rating_1_10, None);
        assert_eq!(bad.cost_usd, 0.0);
    }

    #[test]
    fn test_parse_meals_missing_cost_column() {
        let csv = "meal_id,trip_id,cuisine\n1,1,Thai\n";
        let err = parse_meals_csv(csv.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("cost_usd"));
    }

    #[test]
    fn test_parse_date_formats() {
        let d = NaiveDate::from_ymd_opt(2023, 3, 15);
        assert_eq!(parse_date("2023-03-15"), d);
        assert_eq!(parse_date("2023-03-15 00:00:00"), d);
        assert_eq!(parse_date("2023-03-15T08:30:00"), d);
        assert_eq!(parse_date("3/15/2023"), d);
        assert_eq!(parse_date("15.03.2023"), None);
        assert_eq!(parse_date(""), None);
    }

    #[test]
    fn test_write_then_parse_preserves_tables() {
        let trips = parse_trips_csv(SAMPLE_TRIPS.as_bytes()).unwrap();
        let mut buf = Vec::new();
        write_trips_csv(&mut buf, &trips).unwrap();
        assert_eq!(parse_trips_csv(buf.as_slice()).unwrap(), trips);

        let meals = parse_meals_csv(SAMPLE_MEALS.as_bytes()).unwrap();
        let mut buf = Vec::new();
        write_meals_csv(&mut buf, &meals).unwrap();
        assert_eq!(parse_meals_csv(buf.as_slice()).unwrap(), meals);
    }

    #[test]
    fn test_write_enriched_includes_derived_columns() {
        let trips = vec![template_trip()];
        let meals = vec![template_meal()];
        let enriched = crate::engine::recompute(&trips, &meals);
        let mut buf = Vec::new();
        write_enriched_csv(&mut buf, &enriched).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert!(
            lines
                .next()
                .unwrap()
                .ends_with("days,cost_per_day,food_cost_from_meals,food_cost_final,year")
        );
        assert!(lines.next().unwrap().ends_with(",7,285.71,12,12,2023"));
    }
}
