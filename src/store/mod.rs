pub mod class_cache;
pub mod memory;
pub mod request_cache;
pub mod static_definition;
pub mod traits;

pub use class_cache::*;
pub use memory::*;
pub use request_cache::*;
pub use static_definition::*;
pub use traits::*;
