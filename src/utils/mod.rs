pub mod clock;
pub mod logging;
pub mod time_format;

pub use clock::{Clock, SystemClock};
