pub mod common;
pub mod definition;
pub mod filter;
pub mod node;
pub mod params;
pub mod request;
pub mod row;

pub use common::*;
pub use definition::*;
pub use filter::*;
pub use node::*;
pub use params::*;
pub use request::*;
pub use row::*;
