pub mod api_key;
pub mod candidate;
pub mod project;
