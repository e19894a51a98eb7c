pub mod catalog;
pub mod context;
pub mod exclusions;
pub mod external;
pub mod generative;
pub mod orchestrator;
pub mod profile;
pub mod quota;
pub mod strategy;
