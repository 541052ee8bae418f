//! Persistence collaborators: generated artifacts on disk and the JSON
//! store of named generation configs.

pub mod configs;
pub mod images;

pub use configs::ConfigStore;
pub use images::ImageStore;
