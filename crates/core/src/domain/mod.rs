pub mod agent;
pub mod grant;
pub mod plan;
pub mod usage;
