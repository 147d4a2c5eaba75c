/// Console + file logging for the relay binaries.
pub mod loggerlocal;

pub use loggerlocal::{parse_level, setup_logging};
