pub mod entities;
pub mod events;
pub mod ports;
pub mod value_objects;

pub use entities::*;
pub use events::*;
pub use ports::*;
pub use shiftfill_core::{DispatchError, DispatchResult};
pub use value_objects::*;
