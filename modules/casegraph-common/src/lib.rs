pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{Config, RerankStrategy, RetrievalConfig};
pub use error::{CaseGraphError, Result};
pub use traits::{LanguageModel, TextEmbedder, VectorIndex};
pub use types::*;
