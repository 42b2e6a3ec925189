pub mod aggregate;
pub mod config;
pub mod db;
pub mod error;
pub mod flush;
pub mod ingest;
pub mod reading;
pub mod routes;
pub mod staging;
pub mod state;
pub mod store;
pub mod topology;

#[cfg(test)]
pub mod test_support;
