pub mod backend;
pub mod clock;
pub mod cpal_backend;
pub mod file;
pub mod framer;
pub mod level;
pub mod pcm;
pub mod resample;
pub mod sink;

pub use backend::{AudioBackend, AudioBackendConfig, AudioDevices, AudioFrame, AudioSource, SystemAudioDevices};
pub use clock::{Clock, ManualClock, MonotonicClock, SampleClock};
pub use file::{AudioFile, FileBackend};
pub use framer::FrameAccumulator;
pub use level::amplitude_level;
pub use pcm::{decode_blob, decode_pcm, encode_pcm, DecodeError, EncodedAudioBlob, PcmBuffer};
pub use sink::{NullSink, OutputSink, SinkLog, UnitId};
