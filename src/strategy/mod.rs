//! Strategy layer: market regime, position sizing and exit rules.

pub mod exits;
pub mod regime;
pub mod risk;
