pub mod price;
pub mod spike;
pub mod subscription;

pub use price::*;
pub use spike::*;
pub use subscription::*;
