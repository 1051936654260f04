pub mod aqi;
pub mod config;
pub mod fetch;
pub mod merge;
pub mod raw_table;
pub mod zipcode;
