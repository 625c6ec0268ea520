mod data;
mod helpers;
mod meal;
mod summary;
mod trip;

pub(crate) use data::{ExportArg, TableArg, cmd_clear, cmd_export, cmd_import, cmd_template};
pub(crate) use helpers::FilterArgs;
pub(crate) use meal::{
    MealAddArgs, MealEditArgs, cmd_meal_add, cmd_meal_delete, cmd_meal_edit, cmd_meal_list,
};
pub(crate) use summary::{
    cmd_connectivity, cmd_food, cmd_leaderboard, cmd_summary, cmd_workability,
};
pub(crate) use trip::{
    TripAddArgs, TripEditArgs, cmd_trip_add, cmd_trip_delete, cmd_trip_edit, cmd_trip_list,
    cmd_trip_speed,
};
