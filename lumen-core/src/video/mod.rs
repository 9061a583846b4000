pub mod bitstream;
pub mod buffer;
pub mod decoder;
pub mod gate;
pub mod nal;
pub mod sps;
pub mod unit;

pub use buffer::{DecodeBuffer, INITIAL_DECODE_BUFFER_LEN, ParameterSetCache};
pub use decoder::{Picture, PictureError, PictureResult, TextureSize, VideoDecoder, VideoProfile};
pub use gate::{DecodeContext, Submission, SubmissionGate};
pub use nal::NalKind;
pub use sps::{SpsSummary, parse_sps, rewrite_sps};
pub use unit::DecodeUnit;
