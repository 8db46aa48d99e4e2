pub mod cleaner;
pub mod executor;

pub use cleaner::SqlCleaner;
pub use executor::SqliteExecutor;
