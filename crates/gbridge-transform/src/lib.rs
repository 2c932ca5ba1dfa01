pub mod conversation;
pub mod error;
pub mod generate_content;
pub mod model_map;

pub use error::TransformError;
pub use model_map::ModelMap;
