pub mod screenshot;

pub use screenshot::Screenshot;
