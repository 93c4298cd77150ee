pub mod cli;
pub mod simulate;
pub mod utils;
