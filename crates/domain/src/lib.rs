pub mod entities;
pub mod messaging;
pub mod value_objects;

pub use entities::*;
pub use messaging::*;
pub use taskgrid_core::{GridError, GridResult};
pub use value_objects::*;
