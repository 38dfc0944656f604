pub mod config;
pub mod error;

pub use config::{DetectorConfig, SchedulerSection, TriageConfig, load_dotenv};
pub use error::*;
