mod claude;
mod schema;
mod voyage;

pub use claude::ClaudeModel;
pub use voyage::VoyageEmbedder;
