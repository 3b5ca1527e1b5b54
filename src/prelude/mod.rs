#[macro_use]
pub mod csync_err;
pub mod consts;

pub use consts::*;
pub use csync_err::*;
