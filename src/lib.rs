pub mod capture;
pub mod clock;
pub mod clock_sync;
pub mod correlator;
pub mod device;
pub mod histogram;
pub mod lifecycle;
pub mod limiter;
pub mod ring;
pub mod stats;
pub mod util;

pub const BATCH_SIZE: usize = 64; // TODO: Experiment with size
