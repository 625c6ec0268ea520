//! Secondary aggregates read by the dashboard panels: connectivity, food
//! ratings, leaderboards, and filter facets. All take the already-filtered
//! trip set.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDate;
use serde::Serialize;

use crate::engine::mean;
use crate::models::{EnrichedTrip, GREAT_INTERNET_MBPS, Meal};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterOptions {
    pub countries: Vec<String>,
    pub years: Vec<i32>,
}

/// Distinct countries and years present in the table, sorted.
#[must_use]
pub fn filter_options(trips: &[EnrichedTrip]) -> FilterOptions {
    let countries: BTreeSet<&str> = trips
        .iter()
        .map(|t| t.trip.country.trim())
        .filter(|c| !c.is_empty())
        .collect();
    let years: BTreeSet<i32> = trips.iter().filter_map(|t| t.year).collect();
    FilterOptions {
        countries: countries.into_iter().map(str::to_string).collect(),
        years: years.into_iter().collect(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectivityStats {
    pub avg_speed_mbps: f64,
    pub fastest_mbps: f64,
    pub slowest_mbps: f64,
    pub great_count: usize,
    pub measured_count: usize,
}

#[must_use]
pub fn connectivity_stats(trips: &[EnrichedTrip]) -> Option<ConnectivityStats> {
    let speeds: Vec<f64> = trips
        .iter()
        .filter_map(|t| t.trip.internet_speed_mbps)
        .filter(|s| s.is_finite())
        .collect();
    let avg_speed_mbps = mean(speeds.iter().copied())?;
    Some(ConnectivityStats {
        avg_speed_mbps,
        fastest_mbps: speeds.iter().copied().fold(f64::MIN, f64::max),
        slowest_mbps: speeds.iter().copied().fold(f64::MAX, f64::min),
        great_count: speeds.iter().filter(|s| **s >= GREAT_INTERNET_MBPS).count(),
        measured_count: speeds.len(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountrySpeed {
    pub country: String,
    pub avg_speed_mbps: f64,
    pub trips: usize,
}

/// Mean recorded speed per country, fastest first.
#[must_use]
pub fn speed_by_country(trips: &[EnrichedTrip]) -> Vec<CountrySpeed> {
    let mut groups: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for t in trips {
        let country = t.trip.country.trim();
        if country.is_empty() {
            continue;
        }
        if let Some(speed) = t.trip.internet_speed_mbps.filter(|s| s.is_finite()) {
            groups.entry(country).or_default().push(speed);
        }
    }
    let mut out: Vec<CountrySpeed> = groups
        .into_iter()
        .filter_map(|(country, speeds)| {
            Some(CountrySpeed {
                country: country.to_string(),
                trips: speeds.len(),
                avg_speed_mbps: mean(speeds)?,
            })
        })
        .collect();
    out.sort_by(|a, b| b.avg_speed_mbps.total_cmp(&a.avg_speed_mbps));
    out
}

/// Cheapest per day first.
#[must_use]
pub fn cost_per_day_leaderboard(trips: &[EnrichedTrip]) -> Vec<EnrichedTrip> {
    let mut out = trips.to_vec();
    out.sort_by(|a, b| a.cost_per_day.total_cmp(&b.cost_per_day));
    out
}

#[must_use]
pub fn top_by_spend(trips: &[EnrichedTrip], limit: usize) -> Vec<EnrichedTrip> {
    let mut out = trips.to_vec();
    out.sort_by(|a, b| b.total_cost().total_cmp(&a.total_cost()));
    out.truncate(limit);
    out
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SpendBreakdown {
    pub transportation: f64,
    pub accommodation: f64,
    pub food: f64,
    pub activities: f64,
}

/// Category totals. Food uses the reconciled figure, so itemized meals count
/// instead of the manual estimate.
#[must_use]
pub fn spend_breakdown(trips: &[EnrichedTrip]) -> SpendBreakdown {
    let sum = |f: fn(&EnrichedTrip) -> Option<f64>| -> f64 {
        trips
            .iter()
            .filter_map(f)
            .filter(|v| v.is_finite())
            .sum()
    };
    SpendBreakdown {
        transportation: sum(|t| t.trip.transportation_cost_usd),
        accommodation: sum(|t| t.trip.accommodation_cost_usd),
        food: sum(|t| Some(t.food_cost_final)),
        activities: sum(|t| t.trip.activities_cost_usd),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatingGroup {
    pub key: String,
    pub avg_rating: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TripRating {
    pub trip_id: i64,
    pub trip_name: String,
    pub avg_rating: f64,
    pub count: usize,
}

/// Rated meals belonging to one of `trips`.
fn visible_rated<'a>(
    trips: &'a [EnrichedTrip],
    meals: &'a [Meal],
) -> impl Iterator<Item = (&'a Meal, u8)> + 'a {
    let ids: BTreeSet<i64> = trips.iter().map(|t| t.trip.trip_id).collect();
    meals.iter().filter_map(move |m| {
        let rating = m.rating_1_10?;
        ids.contains(&m.trip_id?).then_some((m, rating))
    })
}

#[allow(clippy::cast_precision_loss)]
fn average(sum: u32, count: usize) -> f64 {
    f64::from(sum) / count as f64
}

fn by_rating_then_count(a: (f64, usize), b: (f64, usize)) -> std::cmp::Ordering {
    b.0.total_cmp(&a.0).then(b.1.cmp(&a.1))
}

/// Average rating per cuisine over meals of the visible trips.
#[must_use]
pub fn cuisine_ratings(trips: &[EnrichedTrip], meals: &[Meal]) -> Vec<RatingGroup> {
    let mut groups: BTreeMap<&str, (u32, usize)> = BTreeMap::new();
    for (meal, rating) in visible_rated(trips, meals) {
        let cuisine = meal.cuisine.trim();
        if cuisine.is_empty() {
            continue;
        }
        let entry = groups.entry(cuisine).or_default();
        entry.0 += u32::from(rating);
        entry.1 += 1;
    }
    let mut out: Vec<RatingGroup> = groups
        .into_iter()
        .map(|(cuisine, (sum, count))| RatingGroup {
            key: cuisine.to_string(),
            avg_rating: average(sum, count),
            count,
        })
        .collect();
    out.sort_by(|a, b| by_rating_then_count((a.avg_rating, a.count), (b.avg_rating, b.count)));
    out
}

/// Average meal rating per visible trip, best first.
#[must_use]
pub fn trip_ratings(trips: &[EnrichedTrip], meals: &[Meal]) -> Vec<TripRating> {
    let mut groups: HashMap<i64, (u32, usize)> = HashMap::new();
    for (meal, rating) in visible_rated(trips, meals) {
        if let Some(trip_id) = meal.trip_id {
            let entry = groups.entry(trip_id).or_default();
            entry.0 += u32::from(rating);
            entry.1 += 1;
        }
    }
    let mut out: Vec<TripRating> = trips
        .iter()
        .filter_map(|t| {
            let (sum, count) = groups.get(&t.trip.trip_id)?;
            Some(TripRating {
                trip_id: t.trip.trip_id,
                trip_name: t.trip.trip_name.clone(),
                avg_rating: average(*sum, *count),
                count: *count,
            })
        })
        .collect();
    out.sort_by(|a, b| by_rating_then_count((a.avg_rating, a.count), (b.avg_rating, b.count)));
    out
}

#[must_use]
pub fn best_food_trip(trips: &[EnrichedTrip], meals: &[Meal]) -> Option<TripRating> {
    trip_ratings(trips, meals).into_iter().next()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MealRow {
    pub meal_id: i64,
    pub trip_id: i64,
    pub trip_name: String,
    pub date: Option<NaiveDate>,
    pub cuisine: String,
    pub restaurant: String,
    pub dish_name: String,
    pub rating_1_10: Option<u8>,
    pub cost_usd: f64,
}

/// Meals of the visible trips joined with the trip name, sorted by trip name then date.
#[must_use]
pub fn meal_log(trips: &[EnrichedTrip], meals: &[Meal]) -> Vec<MealRow> {
    let names: HashMap<i64, &str> = trips
        .iter()
        .map(|t| (t.trip.trip_id, t.trip.trip_name.as_str()))
        .collect();
    let mut rows: Vec<MealRow> = meals
        .iter()
        .filter_map(|m| {
            let trip_id = m.trip_id?;
            let name = names.get(&trip_id)?;
            Some(MealRow {
                meal_id: m.meal_id,
                trip_id,
                trip_name: (*name).to_string(),
                date: m.date,
                cuisine: m.cuisine.clone(),
                restaurant: m.restaurant.clone(),
                dish_name: m.dish_name.clone(),
                rating_1_10: m.rating_1_10,
                cost_usd: m.cost_usd,
            })
        })
        .collect();
    rows.sort_by(|a, b| a.trip_name.cmp(&b.trip_name).then(a.date.cmp(&b.date)));
    rows
}
