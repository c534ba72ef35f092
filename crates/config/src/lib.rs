mod settings;

pub use settings::{RecordingSettings, RtpSettings, Settings, WorkerSettings};
