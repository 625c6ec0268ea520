use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    pub trip_id: i64,
    pub trip_name: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub primary_city: String,
    pub country: String,
    #[serde(default)]
    pub lat: f64,
    #[serde(default)]
    pub lon: f64,
    #[serde(default)]
    pub total_cost_usd: Option<f64>,
    #[serde(default)]
    pub transportation_cost_usd: Option<f64>,
    #[serde(default)]
    pub accommodation_cost_usd: Option<f64>,
    #[serde(default)]
    pub activities_cost_usd: Option<f64>,
    /// Manual trip-level food total. Itemized meals override it, see [`EnrichedTrip`].
    #[serde(default)]
    pub food_cost_usd: Option<f64>,
    #[serde(default)]
    pub internet_speed_mbps: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meal {
    pub meal_id: i64,
    /// `None` when the uploaded value was not an integer; such meals never aggregate.
    pub trip_id: Option<i64>,
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub cuisine: String,
    #[serde(default)]
    pub restaurant: String,
    #[serde(default)]
    pub dish_name: String,
    pub rating_1_10: Option<u8>,
    #[serde(default)]
    pub cost_usd: f64,
}

/// A trip plus the columns derived from it and the current meal table.
///
/// Built only by [`crate::engine::recompute`]; never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedTrip {
    #[serde(flatten)]
    pub trip: Trip,
    pub days: i64,
    pub cost_per_day: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub food_cost_from_meals: Option<f64>,
    pub food_cost_final: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
}

impl EnrichedTrip {
    #[must_use]
    pub fn total_cost(&self) -> f64 {
        self.trip.total_cost_usd.unwrap_or(0.0)
    }
}

#[derive(Debug, Clone)]
pub struct NewTrip {
    pub trip_name: String,
    pub primary_city: String,
    pub country: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub total_cost_usd: f64,
    pub transportation_cost_usd: f64,
    pub accommodation_cost_usd: f64,
    pub activities_cost_usd: f64,
    pub food_cost_usd: f64,
    pub internet_speed_mbps: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct NewMeal {
    pub trip_id: i64,
    pub date: NaiveDate,
    pub cuisine: String,
    pub restaurant: String,
    pub dish_name: String,
    pub rating_1_10: u8,
    pub cost_usd: f64,
}

#[derive(Debug, Clone, Default)]
#[allow(clippy::option_option)]
pub struct UpdateTrip {
    pub trip_name: Option<String>,
    pub primary_city: Option<String>,
    pub country: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub total_cost_usd: Option<Option<f64>>,
    pub transportation_cost_usd: Option<Option<f64>>,
    pub accommodation_cost_usd: Option<Option<f64>>,
    pub activities_cost_usd: Option<Option<f64>>,
    pub food_cost_usd: Option<Option<f64>>,
    pub internet_speed_mbps: Option<Option<f64>>,
}

impl UpdateTrip {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.trip_name.is_none()
            && self.primary_city.is_none()
            && self.country.is_none()
            && self.start_date.is_none()
            && self.end_date.is_none()
            && self.lat.is_none()
            && self.lon.is_none()
            && self.total_cost_usd.is_none()
            && self.transportation_cost_usd.is_none()
            && self.accommodation_cost_usd.is_none()
            && self.activities_cost_usd.is_none()
            && self.food_cost_usd.is_none()
            && self.internet_speed_mbps.is_none()
    }

    /// Apply the patch to a copy of `trip`. The caller validates the result.
    #[must_use]
    pub fn apply(&self, trip: &Trip) -> Trip {
        let mut t = trip.clone();
        if let Some(v) = &self.trip_name {
            t.trip_name.clone_from(v);
        }
        if let Some(v) = &self.primary_city {
            t.primary_city.clone_from(v);
        }
        if let Some(v) = &self.country {
            t.country.clone_from(v);
        }
        if let Some(v) = self.start_date {
            t.start_date = Some(v);
        }
        if let Some(v) = self.end_date {
            t.end_date = Some(v);
        }
        if let Some(v) = self.lat {
            t.lat = v;
        }
        if let Some(v) = self.lon {
            t.lon = v;
        }
        if let Some(v) = self.total_cost_usd {
            t.total_cost_usd = v;
        }
        if let Some(v) = self.transportation_cost_usd {
            t.transportation_cost_usd = v;
        }
        if let Some(v) = self.accommodation_cost_usd {
            t.accommodation_cost_usd = v;
        }
        if let Some(v) = self.activities_cost_usd {
            t.activities_cost_usd = v;
        }
        if let Some(v) = self.food_cost_usd {
            t.food_cost_usd = v;
        }
        if let Some(v) = self.internet_speed_mbps {
            t.internet_speed_mbps = v;
        }
        t
    }
}

#[derive(Debug, Clone, Default)]
pub struct UpdateMeal {
    pub trip_id: Option<i64>,
    pub date: Option<NaiveDate>,
    pub cuisine: Option<String>,
    pub restaurant: Option<String>,
    pub dish_name: Option<String>,
    pub rating_1_10: Option<u8>,
    pub cost_usd: Option<f64>,
}

impl UpdateMeal {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.trip_id.is_none()
            && self.date.is_none()
            && self.cuisine.is_none()
            && self.restaurant.is_none()
            && self.dish_name.is_none()
            && self.rating_1_10.is_none()
            && self.cost_usd.is_none()
    }

    #[must_use]
    pub fn apply(&self, meal: &Meal) -> Meal {
        let mut m = meal.clone();
        if let Some(v) = self.trip_id {
            m.trip_id = Some(v);
        }
        if let Some(v) = self.date {
            m.date = Some(v);
        }
        if let Some(v) = &self.cuisine {
            m.cuisine.clone_from(v);
        }
        if let Some(v) = &self.restaurant {
            m.restaurant.clone_from(v);
        }
        if let Some(v) = &self.dish_name {
            m.dish_name.clone_from(v);
        }
        if let Some(v) = self.rating_1_10 {
            m.rating_1_10 = Some(v);
        }
        if let Some(v) = self.cost_usd {
            m.cost_usd = v;
        }
        m
    }
}

/// Next free id: one past the largest positive id, or 1 for an empty table.
pub fn next_id(ids: impl IntoIterator<Item = i64>) -> i64 {
    ids.into_iter().filter(|id| *id > 0).max().map_or(1, |m| m + 1)
}

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 10;

/// Threshold used for the "good enough for video calls" share.
pub const FAST_INTERNET_MBPS: f64 = 25.0;
/// Threshold used for the "great connection" count.
pub const GREAT_INTERNET_MBPS: f64 = 50.0;

fn require_text(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::validation(format!("{field} is required")));
    }
    Ok(())
}

fn require_amount(value: Option<f64>, field: &str) -> Result<()> {
    match value {
        Some(v) if !v.is_finite() => Err(Error::validation(format!("{field} must be a number"))),
        Some(v) if v < 0.0 => Err(Error::validation(format!("{field} must be non-negative"))),
        _ => Ok(()),
    }
}

pub fn validate_rating(rating: u8) -> Result<u8> {
    if (MIN_RATING..=MAX_RATING).contains(&rating) {
        Ok(rating)
    } else {
        Err(Error::validation(format!(
            "Rating must be between {MIN_RATING} and {MAX_RATING} (got {rating})"
        )))
    }
}

/// Check a trip row entered or edited in-app. Uploaded rows skip this; the engine
/// tolerates whatever they carry.
pub fn validate_trip(trip: &Trip) -> Result<()> {
    require_text(&trip.trip_name, "Trip name")?;
    require_text(&trip.primary_city, "Primary city")?;
    require_text(&trip.country, "Country")?;
    let (Some(start), Some(end)) = (trip.start_date, trip.end_date) else {
        return Err(Error::validation("Start date and end date are required"));
    };
    if end < start {
        return Err(Error::validation(format!(
            "End date {end} cannot be before start date {start}"
        )));
    }
    if !trip.lat.is_finite() || !trip.lon.is_finite() {
        return Err(Error::validation("Coordinates must be numbers"));
    }
    require_amount(trip.total_cost_usd, "Total cost")?;
    require_amount(trip.transportation_cost_usd, "Transportation cost")?;
    require_amount(trip.accommodation_cost_usd, "Accommodation cost")?;
    require_amount(trip.activities_cost_usd, "Activities cost")?;
    require_amount(trip.food_cost_usd, "Food cost")?;
    require_amount(trip.internet_speed_mbps, "Internet speed")?;
    Ok(())
}

pub fn validate_meal(meal: &Meal) -> Result<()> {
    if meal.trip_id.is_none() {
        return Err(Error::validation("Meal must belong to a trip"));
    }
    require_text(&meal.cuisine, "Cuisine")?;
    if meal.date.is_none() {
        return Err(Error::validation("Meal date is required"));
    }
    match meal.rating_1_10 {
        Some(r) => {
            validate_rating(r)?;
        }
        None => return Err(Error::validation("Rating is required")),
    }
    require_amount(Some(meal.cost_usd), "Meal cost")
}

impl NewTrip {
    /// Build the stored row under `trip_id`. Unresolved coordinates default to (0, 0).
    #[must_use]
    pub fn into_trip(self, trip_id: i64) -> Trip {
        Trip {
            trip_id,
            trip_name: self.trip_name.trim().to_string(),
            start_date: Some(self.start_date),
            end_date: Some(self.end_date),
            primary_city: self.primary_city.trim().to_string(),
            country: self.country.trim().to_string(),
            lat: self.lat.unwrap_or(0.0),
            lon: self.lon.unwrap_or(0.0),
            total_cost_usd: Some(self.total_cost_usd),
            transportation_cost_usd: Some(self.transportation_cost_usd),
            accommodation_cost_usd: Some(self.accommodation_cost_usd),
            activities_cost_usd: Some(self.activities_cost_usd),
            food_cost_usd: Some(self.food_cost_usd),
            internet_speed_mbps: self.internet_speed_mbps,
        }
    }
}

impl NewMeal {
    #[must_use]
    pub fn into_meal(self, meal_id: i64) -> Meal {
        Meal {
            meal_id,
            trip_id: Some(self.trip_id),
            date: Some(self.date),
            cuisine: self.cuisine.trim().to_string(),
            restaurant: self.restaurant.trim().to_string(),
            dish_name: self.dish_name.trim().to_string(),
            rating_1_10: Some(self.rating_1_10),
            cost_usd: self.cost_usd,
        }
    }
}
