// configuration module
pub mod config;

// clustering module
pub mod clustering;

// factorization module
pub mod factorization;

// session module
pub mod session;

// linking module
pub mod linking;

pub use session::{Session, Workspace};
