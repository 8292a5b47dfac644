pub mod collector;
pub mod config;
pub mod errors;
pub mod feature;
pub mod logging;
pub mod store;
pub mod util;
pub mod web;
