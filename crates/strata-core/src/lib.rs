pub mod config;
pub mod error;
pub mod event;
pub mod format;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{FailureKind, Result, StrataError};
pub use event::EventBus;
pub use format::{ExpectedFormat, FieldSpec, FieldType, FormatHints};
pub use types::*;
