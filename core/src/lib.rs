pub mod csv_io;
pub mod engine;
pub mod error;
pub mod insights;
pub mod models;
pub mod session;

pub use error::{Error, Result, Table};
pub use session::Session;
