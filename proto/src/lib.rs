#[rustfmt::skip]
mod types;
#[rustfmt::skip]
pub mod peer;

mod convert;

pub use prost::Message;
pub use crate::types::*;
