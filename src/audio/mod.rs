pub mod device;
pub mod rms;
pub mod smoother;
pub mod source;

pub use device::DeviceTap;
pub use rms::{rms, AnalysisMessage, MessageKind, MessagePort, Posted, RmsExtractor, RmsTap};
pub use smoother::{EnvelopeSmoother, RmsWindow};
pub use source::{BufferSource, FrameSource, WavFileSource};
