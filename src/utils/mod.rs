//! Shared utilities: identifiers and fixed-point arithmetic.

mod address;
pub mod decimal;
mod percentage;

pub use address::{Address, AddressParseError};
pub use percentage::{
    add_percentage, apply_percentage, is_percentage_in_range, remove_added_percentage,
    subtract_percentage, Percentage, PERCENTAGE_DECIMALS,
};
