pub mod languages;
pub mod message;
pub mod status;
pub mod utils;
