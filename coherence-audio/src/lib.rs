mod fft;
mod math;

pub mod accumulator;
pub mod acquisition;
pub mod analysis_loop;
pub mod config;
pub mod error;
pub mod mp3;
pub mod pipeline;
pub mod raw_stream;
pub mod running_stat;
pub mod session;
pub mod shared_data;
pub mod tfr;

pub use crate::pipeline::build_pipeline;
pub use crate::session::Session;
pub use crate::tfr::{CumulativeTfr, TfrDimensions};
