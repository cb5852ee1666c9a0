pub mod failure;
pub mod generation;
pub mod job;
