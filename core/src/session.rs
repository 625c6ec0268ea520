use std::collections::HashSet;
use std::io::Read;

use tracing::{debug, warn};

use crate::csv_io;
use crate::engine::{self, Dashboard, TripFilter};
use crate::error::{Error, Result, Table};
use crate::models::{
    EnrichedTrip, Meal, NewMeal, NewTrip, Trip, UpdateMeal, UpdateTrip, next_id, validate_meal,
    validate_trip,
};

/// The two tables a dashboard works on, plus every mutation a front end may
/// apply to them. Derived columns are never stored; read them through
/// [`Session::enriched`] after each change.
#[derive(Debug, Clone, Default)]
pub struct Session {
    trips: Vec<Trip>,
    meals: Vec<Meal>,
}

fn ensure_unique(ids: impl IntoIterator<Item = i64>, table: Table) -> Result<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(Error::validation(format!("Duplicate id {id} in {table} table")));
        }
    }
    Ok(())
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a session from already-parsed tables. Ids must be unique per table.
    pub fn from_tables(trips: Vec<Trip>, meals: Vec<Meal>) -> Result<Self> {
        ensure_unique(trips.iter().map(|t| t.trip_id), Table::Trips)?;
        ensure_unique(meals.iter().map(|m| m.meal_id), Table::Meals)?;
        Ok(Self { trips, meals })
    }

    #[must_use]
    pub fn trips(&self) -> &[Trip] {
        &self.trips
    }

    #[must_use]
    pub fn meals(&self) -> &[Meal] {
        &self.meals
    }

    pub fn trip(&self, id: i64) -> Result<&Trip> {
        self.trips
            .iter()
            .find(|t| t.trip_id == id)
            .ok_or(Error::TripNotFound(id))
    }

    pub fn meal(&self, id: i64) -> Result<&Meal> {
        self.meals
            .iter()
            .find(|m| m.meal_id == id)
            .ok_or(Error::MealNotFound(id))
    }

    fn trip_index(&self, id: i64) -> Result<usize> {
        self.trips
            .iter()
            .position(|t| t.trip_id == id)
            .ok_or(Error::TripNotFound(id))
    }

    fn meal_index(&self, id: i64) -> Result<usize> {
        self.meals
            .iter()
            .position(|m| m.meal_id == id)
            .ok_or(Error::MealNotFound(id))
    }

    // --- Uploads ---

    /// Replace the trip table with an uploaded one. On error the current table is kept.
    pub fn load_trips_csv<R: Read>(&mut self, input: R) -> Result<usize> {
        let trips = csv_io::parse_trips_csv(input).inspect_err(|e| {
            warn!(error = %e, "rejected trips upload");
        })?;
        debug!(rows = trips.len(), "loaded trips table");
        self.trips = trips;
        Ok(self.trips.len())
    }

    /// Replace the meal table with an uploaded one. On error the current table is kept.
    pub fn load_meals_csv<R: Read>(&mut self, input: R) -> Result<usize> {
        let meals = csv_io::parse_meals_csv(input).inspect_err(|e| {
            warn!(error = %e, "rejected meals upload");
        })?;
        debug!(rows = meals.len(), "loaded meals table");
        self.meals = meals;
        Ok(self.meals.len())
    }

    // --- Trips ---

    pub fn add_trip(&mut self, new: NewTrip) -> Result<Trip> {
        let trip = new.into_trip(next_id(self.trips.iter().map(|t| t.trip_id)));
        validate_trip(&trip)?;
        debug!(trip_id = trip.trip_id, "added trip");
        self.trips.push(trip.clone());
        Ok(trip)
    }

    pub fn update_trip(&mut self, id: i64, update: &UpdateTrip) -> Result<Trip> {
        if update.is_empty() {
            return Err(Error::validation("No fields to update"));
        }
        let idx = self.trip_index(id)?;
        let patched = update.apply(&self.trips[idx]);
        validate_trip(&patched)?;
        self.trips[idx] = patched.clone();
        Ok(patched)
    }

    /// Remove a trip. Its meals stay in the meal table as orphans and stop aggregating.
    pub fn delete_trip(&mut self, id: i64) -> Result<Trip> {
        let idx = self.trip_index(id)?;
        let removed = self.trips.remove(idx);
        let orphaned = self
            .meals
            .iter()
            .filter(|m| m.trip_id == Some(id))
            .count();
        debug!(trip_id = id, orphaned, "deleted trip");
        Ok(removed)
    }

    /// Set or clear the recorded internet speed of one trip.
    pub fn set_internet_speed(&mut self, id: i64, speed_mbps: Option<f64>) -> Result<Trip> {
        let update = UpdateTrip {
            internet_speed_mbps: Some(speed_mbps),
            ..UpdateTrip::default()
        };
        self.update_trip(id, &update)
    }

    pub fn clear_trips(&mut self) -> usize {
        let n = self.trips.len();
        self.trips.clear();
        n
    }

    // --- Meals ---

    pub fn add_meal(&mut self, new: NewMeal) -> Result<Meal> {
        self.trip(new.trip_id)?;
        let meal = new.into_meal(next_id(self.meals.iter().map(|m| m.meal_id)));
        validate_meal(&meal)?;
        debug!(meal_id = meal.meal_id, trip_id = ?meal.trip_id, "added meal");
        self.meals.push(meal.clone());
        Ok(meal)
    }

    pub fn update_meal(&mut self, id: i64, update: &UpdateMeal) -> Result<Meal> {
        if update.is_empty() {
            return Err(Error::validation("No fields to update"));
        }
        let idx = self.meal_index(id)?;
        if let Some(trip_id) = update.trip_id {
            self.trip(trip_id)?;
        }
        let patched = update.apply(&self.meals[idx]);
        validate_meal(&patched)?;
        self.meals[idx] = patched.clone();
        Ok(patched)
    }

    pub fn delete_meal(&mut self, id: i64) -> Result<Meal> {
        let idx = self.meal_index(id)?;
        Ok(self.meals.remove(idx))
    }

    pub fn clear_meals(&mut self) -> usize {
        let n = self.meals.len();
        self.meals.clear();
        n
    }

    // --- Derived views ---

    /// Fresh full recompute over the current tables.
    #[must_use]
    pub fn enriched(&self) -> Vec<EnrichedTrip> {
        engine::recompute(&self.trips, &self.meals)
    }

    #[must_use]
    pub fn dashboard(&self, filter: &TripFilter) -> Dashboard {
        engine::build_dashboard(&self.enriched(), filter)
    }
}
