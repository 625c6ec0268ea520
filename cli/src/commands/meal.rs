use anyhow::{Result, bail};
use clap::Args;
use std::collections::HashMap;
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use wayfare_core::Session;
use wayfare_core::models::{NewMeal, UpdateMeal, validate_rating};

use super::helpers::{or_not_found, parse_amount, parse_date, truncate, usd};

#[derive(Args, Debug)]
pub(crate) struct MealAddArgs {
    /// Trip the meal belongs to
    trip_id: i64,
    /// Cuisine (e.g. Japanese, Thai)
    cuisine: String,
    /// Cost in USD
    cost: String,
    /// Rating from 1 to 10
    #[arg(short, long)]
    rating: u8,
    /// Dish name
    #[arg(long, default_value = "")]
    dish: String,
    /// Restaurant name
    #[arg(long, default_value = "")]
    restaurant: String,
    /// Date eaten (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
    #[arg(long)]
    date: Option<String>,
}

#[derive(Args, Debug, Default)]
pub(crate) struct MealEditArgs {
    /// Move the meal to another trip
    #[arg(long)]
    trip: Option<i64>,
    /// New cuisine
    #[arg(long)]
    cuisine: Option<String>,
    /// New cost in USD
    #[arg(long)]
    cost: Option<String>,
    /// New rating from 1 to 10
    #[arg(short, long)]
    rating: Option<u8>,
    /// New dish name
    #[arg(long)]
    dish: Option<String>,
    /// New restaurant name
    #[arg(long)]
    restaurant: Option<String>,
    /// New date
    #[arg(long)]
    date: Option<String>,
}

impl MealEditArgs {
    fn into_update(self) -> Result<UpdateMeal> {
        Ok(UpdateMeal {
            trip_id: self.trip,
            date: self.date.map(Some).map(parse_date).transpose()?,
            cuisine: self.cuisine,
            restaurant: self.restaurant,
            dish_name: self.dish,
            rating_1_10: self.rating.map(validate_rating).transpose()?,
            cost_usd: self.cost.as_deref().map(parse_amount).transpose()?,
        })
    }
}

pub(crate) fn cmd_meal_add(session: &mut Session, args: MealAddArgs, json: bool) -> Result<()> {
    let new = NewMeal {
        trip_id: args.trip_id,
        date: parse_date(args.date)?,
        cuisine: args.cuisine,
        restaurant: args.restaurant,
        dish_name: args.dish,
        rating_1_10: validate_rating(args.rating)?,
        cost_usd: parse_amount(&args.cost)?,
    };
    let meal = or_not_found(session.add_meal(new), json)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&meal)?);
    } else {
        let id = meal.meal_id;
        let cuisine = &meal.cuisine;
        let cost = usd(meal.cost_usd);
        let trip = session.trip(args.trip_id).map(|t| t.trip_name.as_str())?;
        println!("Added meal {id}: {cuisine} for {cost} on {trip}");
    }
    Ok(())
}

pub(crate) fn cmd_meal_list(session: &Session, trip_id: Option<i64>, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct MealRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Trip")]
        trip: String,
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Cuisine")]
        cuisine: String,
        #[tabled(rename = "Dish")]
        dish: String,
        #[tabled(rename = "Restaurant")]
        restaurant: String,
        #[tabled(rename = "Rating")]
        rating: String,
        #[tabled(rename = "Cost")]
        cost: String,
    }

    if let Some(id) = trip_id {
        or_not_found(session.trip(id), json)?;
    }
    let meals: Vec<_> = session
        .meals()
        .iter()
        .filter(|m| trip_id.is_none() || m.trip_id == trip_id)
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&meals)?);
        return Ok(());
    }

    if meals.is_empty() {
        eprintln!("No meals logged");
        process::exit(2);
    }

    let names: HashMap<i64, &str> = session
        .trips()
        .iter()
        .map(|t| (t.trip_id, t.trip_name.as_str()))
        .collect();
    let rows: Vec<MealRow> = meals
        .iter()
        .map(|m| MealRow {
            id: m.meal_id,
            trip: match m.trip_id {
                Some(id) => names
                    .get(&id)
                    .map_or_else(|| format!("{id} (deleted)"), |n| truncate(n, 25)),
                None => "-".to_string(),
            },
            date: m.date.map(|d| d.to_string()).unwrap_or_default(),
            cuisine: m.cuisine.clone(),
            dish: truncate(&m.dish_name, 30),
            restaurant: truncate(&m.restaurant, 25),
            rating: m.rating_1_10.map_or("-".into(), |r| format!("{r}/10")),
            cost: usd(m.cost_usd),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(6..)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}

pub(crate) fn cmd_meal_edit(
    session: &mut Session,
    meal_id: i64,
    args: MealEditArgs,
    json: bool,
) -> Result<()> {
    let update = args.into_update()?;
    if update.is_empty() {
        bail!("Nothing to update. Provide at least one field, e.g. --cost or --rating");
    }
    let meal = or_not_found(session.update_meal(meal_id, &update), json)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&meal)?);
    } else {
        let cuisine = &meal.cuisine;
        let cost = usd(meal.cost_usd);
        println!("Updated meal {meal_id}: {cuisine} for {cost}");
    }
    Ok(())
}

pub(crate) fn cmd_meal_delete(session: &mut Session, meal_id: i64, json: bool) -> Result<()> {
    let meal = or_not_found(session.delete_meal(meal_id), json)?;

    if json {
        println!("{}", serde_json::json!({ "deleted": meal.meal_id }));
    } else {
        println!("Deleted meal {meal_id}");
    }
    Ok(())
}
