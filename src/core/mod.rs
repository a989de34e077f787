pub mod checker;
pub mod domain;
pub mod errors;
pub mod language;
pub mod manager;
pub mod pipeline;
pub mod prompt;
pub mod session;
pub mod traits;
