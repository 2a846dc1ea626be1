pub mod adaptive;
pub mod config;
pub mod deleter;
pub mod dupes;
pub mod engine;
pub mod error;
pub mod hashing;
pub mod platform;
pub mod progress;
pub mod reporter;
pub mod retry;
pub mod scanner;
pub mod storage;
pub mod writer;

pub use config::ScanConfig;
pub use engine::{IndexEngine, IndexResult};
pub use error::Error;
pub use progress::{ProgressReporter, SilentReporter};
