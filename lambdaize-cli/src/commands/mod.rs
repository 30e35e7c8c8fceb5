pub mod common;
pub mod loops;
pub mod run;
pub mod stats;
pub mod transform;
