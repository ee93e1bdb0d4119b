pub mod frame;
pub mod synthetic;

pub use frame::ImageFrame;
pub use frame::PixelFormat;
pub use synthetic::SyntheticCamera;
