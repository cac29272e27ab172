//! The core of SSH handshake analysis.
//! Classifies captured frames, follows each connection's banner and KEXINIT exchange and
//! fingerprints both endpoints once the exchange is complete.
pub mod classify;
pub mod containers;
pub mod core;
pub mod fingerprint;
pub mod kexinit;
pub mod reassembly;
pub mod tracker;
pub mod utils;
