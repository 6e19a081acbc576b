pub mod api;
pub mod components;
pub mod interop;
pub mod projection;

pub use api::*;
pub use components::*;
pub use interop::*;
pub use projection::*;
