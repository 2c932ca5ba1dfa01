pub mod request;
pub mod response;
pub mod stream;

pub use request::{GenerationParams, convert_config_to_params, convert_tools, transform_request};
pub use response::{strip_enclosing_fence, transform_response};
pub use stream::{OpenAIChatCompletionToGeminiStreamState, StreamFlush};
