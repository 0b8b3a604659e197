pub mod config;
pub mod error;
pub mod extended;
pub mod filesystem;
pub mod filter;
pub mod handle;
pub mod history;
pub mod kv;
pub mod library;
pub mod lifecycle;
pub mod metadata;
pub mod midi;
pub mod prelude;
pub mod query;
pub mod registry;
pub mod scanner;
pub mod single_flight;
pub mod upload;

pub use config::*;
pub use error::*;
pub use library::Library;
pub use lifecycle::{InitState, LibraryEvent};
