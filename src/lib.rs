pub mod canonical;
pub mod config;
pub mod db;
pub mod eligibility;
pub mod fetchers;
pub mod freshness;
pub mod lock;
pub mod model;
pub mod normalize;
pub mod refresh;
pub mod worker;
