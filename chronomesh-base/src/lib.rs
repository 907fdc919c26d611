mod config;
mod error;
mod ids;
mod time;

pub use config::Config;
pub use error::{err, Error, Result};
pub use ids::{InstanceId, NodeId, VersionId};
pub use time::{Timestamp, DEFAULT_EXPIRY_SECONDS};
