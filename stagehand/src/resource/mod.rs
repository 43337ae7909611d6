/// Descriptions of the resources the manager owns
pub mod create_info;
pub mod data;
pub mod descriptor;
pub mod record;

pub use create_info::*;
pub use data::{BufferDataRange, ImageDataRange};
pub use descriptor::*;
pub use record::*;
