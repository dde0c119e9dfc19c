pub mod capability;
pub mod classification;
pub mod reasoning;
pub mod state;
pub mod tool;
