mod laps;
mod sessions;

pub use sessions::RestoreMode;
