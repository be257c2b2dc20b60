#![cfg_attr(not(feature = "std"), no_std)]

pub mod assets;
pub mod ecosystem;
pub mod lending;

pub use assets::*;
pub use ecosystem::*;
pub use lending::*;
