//! Selection of the captures to process.
pub mod files;
pub mod processed;
