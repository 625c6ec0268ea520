//! Derived-metrics engine.
//!
//! Pure functions over the trip and meal tables. Every structural change to
//! either table is followed by a full [`recompute`]; nothing here keeps state
//! between calls, so running it twice on the same input yields the same output.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{EnrichedTrip, FAST_INTERNET_MBPS, Meal, Trip};

/// Weight of relative connectivity in the workability score. Fixed, not configurable.
pub const SPEED_WEIGHT: f64 = 0.6;
/// Weight of relative affordability in the workability score. Fixed, not configurable.
pub const AFFORDABILITY_WEIGHT: f64 = 0.4;

/// Round to cents, ties to even. Values too large to scale are returned as is.
fn round2(v: f64) -> f64 {
    let cents = v * 100.0;
    if cents.is_finite() {
        cents.round_ties_even() / 100.0
    } else {
        v
    }
}

fn finite(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite())
}

/// Whole days between start and end, never less than 1.
///
/// Missing dates also count as a single day.
#[must_use]
pub fn trip_days(start: Option<NaiveDate>, end: Option<NaiveDate>) -> i64 {
    match (start, end) {
        (Some(s), Some(e)) => (e - s).num_days().max(1),
        _ => 1,
    }
}

/// `total / days` rounded to cents. A missing total counts as 0.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn cost_per_day(total: Option<f64>, days: i64) -> f64 {
    let total = finite(total).unwrap_or(0.0);
    round2(total / days.max(1) as f64)
}

/// Sum of meal costs keyed by trip. Meals without a trip id are skipped,
/// non-finite costs count as 0.
#[must_use]
pub fn food_cost_by_trip(meals: &[Meal]) -> HashMap<i64, f64> {
    let mut sums: HashMap<i64, f64> = HashMap::new();
    for meal in meals {
        let Some(trip_id) = meal.trip_id else {
            continue;
        };
        let cost = if meal.cost_usd.is_finite() {
            meal.cost_usd
        } else {
            0.0
        };
        *sums.entry(trip_id).or_insert(0.0) += cost;
    }
    sums
}

/// Itemized meals win over the manual figure whenever any exist; the result is
/// never negative.
#[must_use]
pub fn reconcile_food_cost(from_meals: Option<f64>, manual: Option<f64>) -> f64 {
    from_meals.or(finite(manual)).unwrap_or(0.0).max(0.0)
}

fn enrich(trip: &Trip, food: &HashMap<i64, f64>) -> EnrichedTrip {
    let days = trip_days(trip.start_date, trip.end_date);
    let food_cost_from_meals = food.get(&trip.trip_id).copied();
    EnrichedTrip {
        days,
        cost_per_day: cost_per_day(trip.total_cost_usd, days),
        food_cost_final: reconcile_food_cost(food_cost_from_meals, trip.food_cost_usd),
        food_cost_from_meals,
        year: trip.start_date.map(|d| d.year()),
        trip: trip.clone(),
    }
}

/// Rebuild every derived column from scratch. Output order and cardinality match `trips`.
#[must_use]
pub fn recompute(trips: &[Trip], meals: &[Meal]) -> Vec<EnrichedTrip> {
    let food = food_cost_by_trip(meals);
    let enriched: Vec<EnrichedTrip> = trips.iter().map(|t| enrich(t, &food)).collect();
    debug!(
        trips = trips.len(),
        meals = meals.len(),
        trips_with_meals = enriched
            .iter()
            .filter(|t| t.food_cost_from_meals.is_some())
            .count(),
        "recomputed derived trip columns"
    );
    enriched
}

// --- Filtering ---

/// Selection applied to the enriched table. `None` means "all selected".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TripFilter {
    #[serde(default)]
    pub countries: Option<BTreeSet<String>>,
    #[serde(default)]
    pub years: Option<BTreeSet<i32>>,
    #[serde(default)]
    pub search: Option<String>,
}

impl TripFilter {
    #[must_use]
    pub fn matches(&self, trip: &EnrichedTrip) -> bool {
        if let Some(countries) = &self.countries {
            if !countries.contains(&trip.trip.country) {
                return false;
            }
        }
        if let Some(years) = &self.years {
            if !trip.year.is_some_and(|y| years.contains(&y)) {
                return false;
            }
        }
        if let Some(needle) = self.search.as_deref().map(str::trim) {
            if !needle.is_empty() {
                let needle = needle.to_lowercase();
                let hit = trip.trip.trip_name.to_lowercase().contains(&needle)
                    || trip.trip.primary_city.to_lowercase().contains(&needle);
                if !hit {
                    return false;
                }
            }
        }
        true
    }

    #[must_use]
    pub fn select(&self, trips: &[EnrichedTrip]) -> Vec<EnrichedTrip> {
        trips.iter().filter(|t| self.matches(t)).cloned().collect()
    }

    #[must_use]
    pub fn is_unfiltered(&self) -> bool {
        self.countries.is_none()
            && self.years.is_none()
            && self.search.as_deref().is_none_or(|s| s.trim().is_empty())
    }
}

// --- Summary metrics ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Scalar metrics over a selection. `None` marks an undefined aggregate and is
/// never conflated with zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryMetrics {
    pub trip_count: usize,
    pub country_count: usize,
    pub total_spend: f64,
    pub total_days: i64,
    pub avg_cost_per_day_weighted: f64,
    pub median_cost_per_day: Option<f64>,
    pub avg_internet_speed_mbps: Option<f64>,
    pub pct_fast_internet: Option<f64>,
    pub coverage: Option<DateRange>,
}

#[allow(clippy::cast_precision_loss)]
pub(crate) fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

pub(crate) fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some(f64::midpoint(values[mid - 1], values[mid]))
    } else {
        Some(values[mid])
    }
}

/// Metrics over an already-selected set of trips.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn summarize(trips: &[EnrichedTrip]) -> SummaryMetrics {
    let country_count = trips
        .iter()
        .map(|t| t.trip.country.trim())
        .filter(|c| !c.is_empty())
        .collect::<HashSet<_>>()
        .len();
    let total_spend: f64 = trips.iter().map(EnrichedTrip::total_cost).sum();
    let total_days: i64 = trips.iter().map(|t| t.days).sum();
    let avg_cost_per_day_weighted = if total_days != 0 && total_spend != 0.0 {
        total_spend / total_days as f64
    } else {
        0.0
    };

    let speeds: Vec<f64> = trips
        .iter()
        .filter_map(|t| finite(t.trip.internet_speed_mbps))
        .collect();
    let pct_fast_internet = if speeds.is_empty() {
        None
    } else {
        let fast = speeds.iter().filter(|s| **s >= FAST_INTERNET_MBPS).count();
        Some(fast as f64 / speeds.len() as f64 * 100.0)
    };

    let earliest = trips.iter().filter_map(|t| t.trip.start_date).min();
    let latest = trips.iter().filter_map(|t| t.trip.end_date).max();
    let coverage = match (earliest, latest) {
        (Some(start), Some(end)) => Some(DateRange { start, end }),
        _ => None,
    };

    SummaryMetrics {
        trip_count: trips.len(),
        country_count,
        total_spend,
        total_days,
        avg_cost_per_day_weighted,
        median_cost_per_day: median(trips.iter().map(|t| t.cost_per_day).collect()),
        avg_internet_speed_mbps: mean(speeds.iter().copied()),
        pct_fast_internet,
        coverage,
    }
}

/// Select with `filter`, then summarize the selection.
#[must_use]
pub fn filtered_summary(trips: &[EnrichedTrip], filter: &TripFilter) -> SummaryMetrics {
    summarize(&filter.select(trips))
}

// --- Workability ---

#[derive(Debug, Clone, Copy)]
struct Span {
    min: f64,
    max: f64,
}

impl Span {
    fn of(values: impl IntoIterator<Item = f64>) -> Option<Self> {
        values.into_iter().fold(None, |acc, v| match acc {
            None => Some(Span { min: v, max: v }),
            Some(s) => Some(Span {
                min: s.min.min(v),
                max: s.max.max(v),
            }),
        })
    }

    /// Linear position of `v` in the span; a zero-width span maps everything to 1.
    fn normalize(self, v: f64) -> f64 {
        if self.max > self.min {
            ((v - self.min) / (self.max - self.min)).clamp(0.0, 1.0)
        } else {
            1.0
        }
    }
}

fn inverse_cost(cost_per_day: f64) -> Option<f64> {
    if cost_per_day != 0.0 && cost_per_day.is_finite() {
        Some(1.0 / cost_per_day)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Workability {
    pub speed_norm: f64,
    pub afford_norm: f64,
    pub score: f64,
}

/// Normalization ranges of a basis set, computed once and reused per trip.
///
/// Scores are relative: the same trip scores differently against different
/// bases, which is how the dashboard ranks destinations among the ones in view.
#[derive(Debug, Clone)]
pub struct WorkabilityBasis {
    speed: Option<Span>,
    inv_cost: Option<Span>,
    zero_cost_inv: f64,
}

impl WorkabilityBasis {
    #[must_use]
    pub fn new(basis: &[EnrichedTrip]) -> Self {
        let speed = Span::of(
            basis
                .iter()
                .filter_map(|t| finite(t.trip.internet_speed_mbps)),
        );
        // Free trips borrow the best finite affordability in the basis.
        let zero_cost_inv = basis
            .iter()
            .filter_map(|t| inverse_cost(t.cost_per_day))
            .reduce(f64::max)
            .unwrap_or(1.0);
        let inv_cost = Span::of(
            basis
                .iter()
                .map(|t| inverse_cost(t.cost_per_day).unwrap_or(zero_cost_inv)),
        );
        Self {
            speed,
            inv_cost,
            zero_cost_inv,
        }
    }

    #[must_use]
    pub fn evaluate(&self, trip: &EnrichedTrip) -> Workability {
        let speed_norm = match (finite(trip.trip.internet_speed_mbps), self.speed) {
            (Some(v), Some(span)) => span.normalize(v),
            _ => 0.0,
        };
        let inv = inverse_cost(trip.cost_per_day).unwrap_or(self.zero_cost_inv);
        let afford_norm = self.inv_cost.map_or(0.0, |span| span.normalize(inv));
        Workability {
            speed_norm,
            afford_norm,
            score: 100.0 * (SPEED_WEIGHT * speed_norm + AFFORDABILITY_WEIGHT * afford_norm),
        }
    }

    #[must_use]
    pub fn score(&self, trip: &EnrichedTrip) -> f64 {
        self.evaluate(trip).score
    }
}

/// Score in `[0, 100]` of `trip` relative to `basis`.
#[must_use]
pub fn workability_score(trip: &EnrichedTrip, basis: &[EnrichedTrip]) -> f64 {
    WorkabilityBasis::new(basis).score(trip)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedTrip {
    pub trip_id: i64,
    pub trip_name: String,
    pub country: String,
    pub internet_speed_mbps: f64,
    pub cost_per_day: f64,
    #[serde(flatten)]
    pub workability: Workability,
}

/// Basis trips with a recorded speed, best workability first.
///
/// Trips without a speed are dropped before normalizing, so both ranges span
/// only the ranked trips. Scores here can therefore differ from the
/// dashboard's per-trip score, which normalizes over the whole visible set.
#[must_use]
pub fn rank_workability(basis: &[EnrichedTrip], limit: usize) -> Vec<RankedTrip> {
    let measured: Vec<EnrichedTrip> = basis
        .iter()
        .filter(|t| finite(t.trip.internet_speed_mbps).is_some())
        .cloned()
        .collect();
    let scorer = WorkabilityBasis::new(&measured);
    let mut ranked: Vec<RankedTrip> = measured
        .iter()
        .filter_map(|t| {
            let speed = finite(t.trip.internet_speed_mbps)?;
            Some(RankedTrip {
                trip_id: t.trip.trip_id,
                trip_name: t.trip.trip_name.clone(),
                country: t.trip.country.clone(),
                internet_speed_mbps: speed,
                cost_per_day: t.cost_per_day,
                workability: scorer.evaluate(t),
            })
        })
        .collect();
    ranked.sort_by(|a, b| b.workability.score.total_cmp(&a.workability.score));
    ranked.truncate(limit);
    ranked
}

// --- Dashboard bundle ---

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredTrip {
    #[serde(flatten)]
    pub trip: EnrichedTrip,
    pub workability_score: f64,
}

/// What the rendering layer reads: the visible trips, each scored against the
/// visible set, plus the summary metrics of that set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dashboard {
    pub filter: TripFilter,
    pub trips: Vec<ScoredTrip>,
    pub summary: SummaryMetrics,
}

#[must_use]
pub fn build_dashboard(enriched: &[EnrichedTrip], filter: &TripFilter) -> Dashboard {
    let visible = filter.select(enriched);
    let scorer = WorkabilityBasis::new(&visible);
    let summary = summarize(&visible);
    let trips = visible
        .into_iter()
        .map(|trip| ScoredTrip {
            workability_score: scorer.score(&trip),
            trip,
        })
        .collect();
    Dashboard {
        filter: filter.clone(),
        trips,
        summary,
    }
}
