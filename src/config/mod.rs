//! Configuration parsing and types.
//!
//! - `types` - Runtime provider config (`ProviderConfig`, `WorkerCommand`)
//!   and the stack file layout (`StackFile`, `ProviderSettings`)
//! - `duration` - Human-readable duration strings
//! - `parser` - YAML stack file loading and validation

mod duration;
mod parser;
mod types;

pub use duration::parse_duration_string;
pub use parser::*;
pub use types::*;
