pub mod filter;
pub mod rows;
pub mod store;

pub use filter::ContentFilter;
pub use rows::*;
pub use store::PgStore;
