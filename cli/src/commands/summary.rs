use anyhow::Result;
use serde::Serialize;
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use wayfare_core::Session;
use wayfare_core::engine::{self, RankedTrip, SummaryMetrics};
use wayfare_core::insights::{
    self, ConnectivityStats, CountrySpeed, RatingGroup, SpendBreakdown, TripRating,
};
use wayfare_core::models::EnrichedTrip;

use super::helpers::{FilterArgs, describe_filter, no_neg_zero, opt_fmt, truncate, usd};

fn exit_empty(filter: &FilterArgs) -> ! {
    eprintln!("No trips match ({})", describe_filter(&filter.to_filter()));
    process::exit(2);
}

fn visible(session: &Session, filter: &FilterArgs) -> Vec<EnrichedTrip> {
    filter.to_filter().select(&session.enriched())
}

pub(crate) fn cmd_summary(session: &Session, filter: &FilterArgs, json: bool) -> Result<()> {
    #[derive(Serialize)]
    struct SummaryReport {
        #[serde(flatten)]
        metrics: SummaryMetrics,
        spend: SpendBreakdown,
    }

    let trips = visible(session, filter);
    let report = SummaryReport {
        metrics: engine::summarize(&trips),
        spend: insights::spend_breakdown(&trips),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if trips.is_empty() {
        exit_empty(filter);
    }

    let m = &report.metrics;
    println!("=== {} ===\n", describe_filter(&filter.to_filter()));
    println!("  Trips:              {}", m.trip_count);
    println!("  Countries:          {}", m.country_count);
    if let Some(range) = &m.coverage {
        println!("  Coverage:           {} to {}", range.start, range.end);
    }
    println!("  Days on the road:   {}", m.total_days);
    println!("  Total spend:        {}", usd(m.total_spend));
    println!(
        "  Avg cost/day:       {} (weighted by trip length)",
        usd(m.avg_cost_per_day_weighted)
    );
    println!(
        "  Median cost/day:    {}",
        opt_fmt(m.median_cost_per_day, usd)
    );
    println!(
        "  Avg internet:       {}",
        opt_fmt(m.avg_internet_speed_mbps, |v| format!("{v:.1} Mbps"))
    );
    println!(
        "  Fast internet:      {}",
        opt_fmt(m.pct_fast_internet, |v| format!("{:.0}% of measured trips", no_neg_zero(v)))
    );

    let s = &report.spend;
    println!();
    println!("  SPEND BREAKDOWN");
    println!("    Transportation:   {}", usd(s.transportation));
    println!("    Accommodation:    {}", usd(s.accommodation));
    println!("    Food:             {}", usd(s.food));
    println!("    Activities:       {}", usd(s.activities));
    Ok(())
}

pub(crate) fn cmd_leaderboard(
    session: &Session,
    filter: &FilterArgs,
    top: Option<usize>,
    json: bool,
) -> Result<()> {
    #[derive(Tabled)]
    struct LeaderRow {
        #[tabled(rename = "#")]
        rank: usize,
        #[tabled(rename = "Trip")]
        name: String,
        #[tabled(rename = "Country")]
        country: String,
        #[tabled(rename = "Days")]
        days: i64,
        #[tabled(rename = "Total")]
        total: String,
        #[tabled(rename = "Per day")]
        per_day: String,
    }

    let mut board = insights::cost_per_day_leaderboard(&visible(session, filter));
    if let Some(n) = top {
        board.truncate(n);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&board)?);
        return Ok(());
    }

    if board.is_empty() {
        exit_empty(filter);
    }

    let rows: Vec<LeaderRow> = board
        .iter()
        .enumerate()
        .map(|(i, t)| LeaderRow {
            rank: i + 1,
            name: truncate(&t.trip.trip_name, 30),
            country: t.trip.country.clone(),
            days: t.days,
            total: usd(t.total_cost()),
            per_day: usd(t.cost_per_day),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(3..)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}

pub(crate) fn cmd_workability(
    session: &Session,
    filter: &FilterArgs,
    top: usize,
    json: bool,
) -> Result<()> {
    #[derive(Tabled)]
    struct WorkRow {
        #[tabled(rename = "#")]
        rank: usize,
        #[tabled(rename = "Trip")]
        name: String,
        #[tabled(rename = "Country")]
        country: String,
        #[tabled(rename = "Mbps")]
        speed: String,
        #[tabled(rename = "Per day")]
        per_day: String,
        #[tabled(rename = "Score")]
        score: String,
    }

    let ranked: Vec<RankedTrip> = engine::rank_workability(&visible(session, filter), top);

    if json {
        println!("{}", serde_json::to_string_pretty(&ranked)?);
        return Ok(());
    }

    if ranked.is_empty() {
        eprintln!(
            "No trips with a recorded internet speed ({})",
            describe_filter(&filter.to_filter())
        );
        process::exit(2);
    }

    let rows: Vec<WorkRow> = ranked
        .iter()
        .enumerate()
        .map(|(i, r)| WorkRow {
            rank: i + 1,
            name: truncate(&r.trip_name, 30),
            country: r.country.clone(),
            speed: format!("{:.0}", r.internet_speed_mbps),
            per_day: usd(r.cost_per_day),
            score: format!("{:.1}", no_neg_zero(r.workability.score)),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(3..)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    println!(
        "Score = {:.0}% relative speed + {:.0}% relative affordability, among the trips shown",
        engine::SPEED_WEIGHT * 100.0,
        engine::AFFORDABILITY_WEIGHT * 100.0
    );
    Ok(())
}

pub(crate) fn cmd_connectivity(session: &Session, filter: &FilterArgs, json: bool) -> Result<()> {
    #[derive(Serialize)]
    struct ConnectivityReport {
        stats: Option<ConnectivityStats>,
        by_country: Vec<CountrySpeed>,
    }

    #[derive(Tabled)]
    struct CountryRow {
        #[tabled(rename = "Country")]
        country: String,
        #[tabled(rename = "Avg Mbps")]
        speed: String,
        #[tabled(rename = "Trips")]
        trips: usize,
    }

    let trips = visible(session, filter);
    let report = ConnectivityReport {
        stats: insights::connectivity_stats(&trips),
        by_country: insights::speed_by_country(&trips),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let Some(stats) = &report.stats else {
        eprintln!(
            "No internet speeds recorded ({})",
            describe_filter(&filter.to_filter())
        );
        process::exit(2);
    };

    println!(
        "  Average: {:.1} Mbps | Fastest: {:.1} Mbps | Slowest: {:.1} Mbps",
        stats.avg_speed_mbps, stats.fastest_mbps, stats.slowest_mbps
    );
    println!(
        "  {} of {} measured trips at 50+ Mbps\n",
        stats.great_count, stats.measured_count
    );

    let rows: Vec<CountryRow> = report
        .by_country
        .iter()
        .map(|c| CountryRow {
            country: c.country.clone(),
            speed: format!("{:.1}", c.avg_speed_mbps),
            trips: c.trips,
        })
        .collect();
    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}

pub(crate) fn cmd_food(session: &Session, filter: &FilterArgs, json: bool) -> Result<()> {
    #[derive(Serialize)]
    struct FoodReport {
        best_trip: Option<TripRating>,
        cuisines: Vec<RatingGroup>,
        trips: Vec<TripRating>,
    }

    #[derive(Tabled)]
    struct RatingRow {
        #[tabled(rename = "Cuisine")]
        key: String,
        #[tabled(rename = "Avg rating")]
        rating: String,
        #[tabled(rename = "Meals")]
        count: usize,
    }

    let trips = visible(session, filter);
    let meals = session.meals();
    let by_trip = insights::trip_ratings(&trips, meals);
    let report = FoodReport {
        best_trip: by_trip.first().cloned(),
        cuisines: insights::cuisine_ratings(&trips, meals),
        trips: by_trip,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let Some(best) = &report.best_trip else {
        eprintln!(
            "No rated meals for the selected trips ({})",
            describe_filter(&filter.to_filter())
        );
        process::exit(2);
    };

    let name = &best.trip_name;
    let avg = best.avg_rating;
    let n = best.count;
    println!("  Best food trip: {name} ({avg:.1}/10 over {n} meals)\n");

    let rows: Vec<RatingRow> = report
        .cuisines
        .iter()
        .map(|g| RatingRow {
            key: g.key.clone(),
            rating: format!("{:.1}", g.avg_rating),
            count: g.count,
        })
        .collect();
    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}
