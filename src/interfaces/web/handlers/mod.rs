pub mod deployments;
pub mod operator;
pub mod processes;
pub mod runs;
