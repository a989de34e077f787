pub mod executor;
pub mod process;
pub mod workspace;
