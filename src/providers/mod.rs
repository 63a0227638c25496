pub mod openai;
pub mod traits;
pub mod types;

pub use openai::OpenAiCompatibleProvider;
pub use traits::AiProvider;
pub use types::{ChatRequest, ModelInfo, ProviderError, StreamEvent};
