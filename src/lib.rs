//! keihash reconstructs the SSH identification banners and KEXINIT messages of every
//! connection in a packet capture and fingerprints each endpoint by its KEXINIT name-lists.
pub mod analyser;
pub mod capture;
pub mod error;
pub mod input;
pub mod ui;

pub use error::{Error, Result};
