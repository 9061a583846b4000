pub mod controller;
pub mod input;
pub mod phase;
pub mod transport;

pub use controller::{SessionController, SessionOptions};
pub use input::{InputSource, NullInput};
pub use phase::SessionPhase;
pub use transport::{
    AudioConfiguration, Capabilities, ConnectionCallbacks, ConnectionListener, DecoderRenderer,
    DecoderSetup, StreamConfig, SubmitStatus, Transport, VideoFormat,
};
