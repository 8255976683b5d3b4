pub mod auth;
pub mod authz;
pub mod configuration;
pub mod error;
pub mod routes;
pub mod startup;
pub mod telemetry;
pub mod validators;
