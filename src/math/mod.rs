// DANS : src/math/mod.rs

pub mod reserves;

pub use reserves::{compute, ReserveQuote};
