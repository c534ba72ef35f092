use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub worker: WorkerSettings,
    pub recording: RecordingSettings,
    pub rtp: RtpSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerSettings {
    /// Number of media-worker subprocesses to keep alive.
    pub num_workers: u32,
    /// Path to the media worker binary, or the current executable when
    /// `embedded` is set and the binary re-execs itself with a mode flag.
    pub binary: PathBuf,
    pub embedded: bool,
    pub log_level: String,
    pub log_tags: Vec<String>,
    pub rtc_min_port: u16,
    pub rtc_max_port: u16,
    pub dtls_certificate_file: Option<PathBuf>,
    pub dtls_private_key_file: Option<PathBuf>,
    /// Synchronous RPC timeout, in milliseconds.
    pub request_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RecordingSettings {
    pub root_dir: PathBuf,
    pub media_processor_binary: PathBuf,
    pub sigkill_escalation_secs: u64,
    pub keyframe_request_delay_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RtpSettings {
    pub max_frame_len_bytes: u32,
    pub dynamic_payload_min: u8,
    pub dynamic_payload_max: u8,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::default().separator("__").prefix("RCC"))
            .set_default("worker.num_workers", 2)?
            .set_default("worker.binary", "mediasoup-worker")?
            .set_default("worker.embedded", false)?
            .set_default("worker.log_level", "error")?
            .set_default("worker.log_tags", Vec::<String>::new())?
            .set_default("worker.rtc_min_port", 40000)?
            .set_default("worker.rtc_max_port", 49999)?
            .set_default("worker.dtls_certificate_file", None::<String>)?
            .set_default("worker.dtls_private_key_file", None::<String>)?
            .set_default("worker.request_timeout_ms", 10_000)?
            .set_default("recording.root_dir", "recordings")?
            .set_default("recording.media_processor_binary", "ffmpeg")?
            .set_default("recording.sigkill_escalation_secs", 30)?
            .set_default("recording.keyframe_request_delay_secs", 1)?
            .set_default("rtp.max_frame_len_bytes", 1024 * 1024)?
            .set_default("rtp.dynamic_payload_min", 96)?
            .set_default("rtp.dynamic_payload_max", 127)?
            .build()?;

        config.try_deserialize()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::load().expect("failed to load default RCC settings")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_succeeds_with_defaults_only() {
        let settings = Settings::load().expect("defaults alone must be sufficient");
        assert_eq!(settings.worker.num_workers, 2);
        assert_eq!(settings.worker.binary, PathBuf::from("mediasoup-worker"));
        assert_eq!(settings.worker.rtc_min_port, 40000);
        assert_eq!(settings.worker.rtc_max_port, 49999);
        assert_eq!(settings.recording.root_dir, PathBuf::from("recordings"));
        assert_eq!(settings.recording.media_processor_binary, PathBuf::from("ffmpeg"));
        assert_eq!(settings.rtp.dynamic_payload_min, 96);
        assert_eq!(settings.rtp.dynamic_payload_max, 127);
    }

    #[test]
    fn environment_override_wins_over_defaults() {
        std::env::set_var("RCC__WORKER__NUM_WORKERS", "5");
        let settings = Settings::load().unwrap();
        std::env::remove_var("RCC__WORKER__NUM_WORKERS");
        assert_eq!(settings.worker.num_workers, 5);
    }
}
