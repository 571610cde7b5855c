pub mod events;
pub mod handler;
pub mod registry;
pub mod session;

pub use events::ChatEvent;
pub use registry::{ConnectionRegistry, SessionHandle};
