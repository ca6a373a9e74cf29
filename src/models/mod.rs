pub mod credential;
pub mod tenant;
pub mod usage;
