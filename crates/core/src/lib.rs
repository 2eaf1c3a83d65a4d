pub mod config;
pub mod error;
pub mod model;
pub mod step;

pub use config::Config;
pub use error::*;
pub use model::*;
pub use step::*;
