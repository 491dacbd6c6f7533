#[macro_use]
pub mod optim;

pub mod backoff;
pub mod state;
