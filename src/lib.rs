pub mod client;
pub mod config;
pub mod departures;
pub mod error;
pub mod extract;
pub mod fanout;
pub mod fetch;
pub mod loader;
pub mod model;
pub mod output;
pub mod parser;
pub mod store;
