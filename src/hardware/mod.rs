//! Device links and output channels
//!
//! The combiner talks to hardware only through the traits defined here:
//! [`DeviceLink`]/[`InterrogatorLink`] for the input devices and
//! [`LineSink`] for outputs.

pub mod error;
pub mod link;
pub mod mock;
pub mod output;

pub use error::{CommError, CommResult};
pub use link::{
    CompassEvent, DeviceInfo, DeviceLink, GnssEvent, InterrogatorEvent, InterrogatorLink, NavigationReport,
    QueryKind,
};
pub use mock::{MemorySink, MockAuxLink, MockInterrogator};
pub use output::{LineSink, SerialLineSink, UdpLineSink};
