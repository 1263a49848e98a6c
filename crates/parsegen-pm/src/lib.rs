mod error;
mod manager;
mod template;

pub use error::PmError;
pub use manager::PromptManager;
pub use template::{PARSER_GENERATE, PromptTemplate};
