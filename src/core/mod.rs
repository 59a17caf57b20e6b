//! Runtime of the two Garduino programs.

pub mod csv_log;
pub mod error;
pub mod publisher;
pub mod reading;
pub mod serial_logger;

pub use error::{SerialError, ShadowError};
pub use publisher::ShadowPublisher;
pub use reading::{Reading, ReadingSource, StaticReadingSource};
pub use serial_logger::{SerialLogger, SerialPortSource};
