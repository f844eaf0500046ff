mod definitions;
mod loggers;
mod output;

pub use definitions::*;
pub use loggers::*;
pub use output::*;
