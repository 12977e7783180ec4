pub mod session;

pub use session::{NewSession, Session, SessionWithLaps};
