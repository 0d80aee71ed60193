//! # strata-relational
//!
//! Reference implementations of the engine's opaque learning services:
//! a greedy FOIL-style clause inducer ([`Foil`]) and a diagonal two-class
//! discriminant fitter ([`DiagonalDiscriminant`]). The engine consumes both
//! through the `strata-core` trait seams only.

pub mod discriminant;
pub mod foil;

pub use discriminant::DiagonalDiscriminant;
pub use foil::Foil;
