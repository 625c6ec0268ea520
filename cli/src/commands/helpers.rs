use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate};
use clap::Args;
use serde::Serialize;
use std::collections::BTreeSet;
use std::process;

use wayfare_core::csv_io;
use wayfare_core::engine::TripFilter;

/// Dashboard filters shared by the read-only commands.
#[derive(Args, Debug, Clone, Default)]
pub(crate) struct FilterArgs {
    /// Only trips in this country (repeatable)
    #[arg(long = "country", value_name = "COUNTRY")]
    pub countries: Vec<String>,
    /// Only trips starting in this year (repeatable)
    #[arg(long = "year", value_name = "YEAR")]
    pub years: Vec<i32>,
    /// Case-insensitive match on trip name or city
    #[arg(long)]
    pub search: Option<String>,
}

impl FilterArgs {
    /// An empty list means "no filter", not "nothing selected".
    pub(crate) fn to_filter(&self) -> TripFilter {
        TripFilter {
            countries: (!self.countries.is_empty())
                .then(|| self.countries.iter().map(|c| c.trim().to_string()).collect()),
            years: (!self.years.is_empty()).then(|| self.years.iter().copied().collect()),
            search: self
                .search
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        }
    }
}

pub(crate) fn parse_date(date_str: Option<String>) -> Result<NaiveDate> {
    match date_str {
        None => Ok(Local::now().date_naive()),
        Some(s) => match s.as_str() {
            "today" => Ok(Local::now().date_naive()),
            "yesterday" => Ok(Local::now().date_naive() - chrono::Duration::days(1)),
            "tomorrow" => Ok(Local::now().date_naive() + chrono::Duration::days(1)),
            _ => csv_io::parse_date(&s).with_context(|| {
                format!("Invalid date '{s}'. Use YYYY-MM-DD, M/D/YYYY or today/yesterday/tomorrow")
            }),
        },
    }
}

/// Non-negative finite amount from a flag.
pub(crate) fn parse_amount(s: &str) -> Result<f64> {
    let cleaned: String = s.trim().chars().filter(|c| !matches!(c, ',' | '$')).collect();
    let value: f64 = cleaned
        .parse()
        .with_context(|| format!("Invalid amount '{s}'"))?;
    if !value.is_finite() || value < 0.0 {
        bail!("Amount must be a non-negative number (got '{s}')");
    }
    Ok(value)
}

/// Print the core error for a missing record and exit with status 2.
pub(crate) fn exit_not_found(message: &str, json: bool) -> ! {
    if json {
        println!("{}", json_error(message));
    } else {
        eprintln!("{message}");
    }
    process::exit(2);
}

/// Unwrap a session result, turning "not found" into exit status 2.
pub(crate) fn or_not_found<T>(result: wayfare_core::Result<T>, json: bool) -> Result<T> {
    match result {
        Ok(v) => Ok(v),
        Err(e) if e.is_not_found() => exit_not_found(&e.to_string(), json),
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

pub(crate) fn no_neg_zero(v: f64) -> f64 {
    if v == 0.0 { 0.0 } else { v }
}

/// `$1,234.56`
pub(crate) fn usd(v: f64) -> String {
    let v = no_neg_zero(v);
    let cents = format!("{:.2}", v.abs());
    let (whole, frac) = cents.split_once('.').unwrap_or((cents.as_str(), "00"));
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, c) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    let sign = if v < 0.0 { "-" } else { "" };
    format!("{sign}${grouped}.{frac}")
}

pub(crate) fn opt_fmt(v: Option<f64>, f: impl Fn(f64) -> String) -> String {
    v.map_or_else(|| "-".to_string(), f)
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}

/// Short description of the active filters, for empty-result messages.
pub(crate) fn describe_filter(filter: &TripFilter) -> String {
    let mut parts = Vec::new();
    if let Some(c) = &filter.countries {
        parts.push(format!("countries: {}", join(c)));
    }
    if let Some(y) = &filter.years {
        parts.push(format!("years: {}", join(y)));
    }
    if let Some(q) = &filter.search {
        parts.push(format!("search: '{q}'"));
    }
    if parts.is_empty() {
        "all trips".to_string()
    } else {
        parts.join(", ")
    }
}

fn join<T: ToString>(set: &BTreeSet<T>) -> String {
    set.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
