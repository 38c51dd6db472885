pub mod app;
pub mod clientip;
pub mod error;
pub mod exclusion;
pub mod geoip;
pub mod identity;
pub mod mailer;
pub mod rate_limit;
pub mod routes;
pub mod spike;
pub mod state;
