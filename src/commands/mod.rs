pub mod denoise;
pub mod events;
pub mod settings;
