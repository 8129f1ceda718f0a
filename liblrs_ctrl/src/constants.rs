// Raw ADC64 stream layout
pub const SYNC_WORD: u32 = 0x2A50D5AF;
pub const WORD_SIZE: usize = 4;
/// Offset from the start of the sync word to the unix millisecond timestamp
pub const UNIX_MS_OFFSET: u64 = 12;
/// Offset from the start of the sync word to the TAI seconds counter
pub const TAI_S_OFFSET: u64 = 32;
/// Bytes required after (and including) the sync word to decode both timestamps
pub const RECORD_TIMESTAMP_SPAN: u64 = TAI_S_OFFSET + 4;
pub const REVERSE_SCAN_CHUNK_SIZE: usize = 4096 * 16;

pub const CHECKSUM_CHUNK_SIZE: usize = 1 << 20;

/// Written in place of any timestamp or event number when no event is found
pub const NO_EVENT_SENTINEL: i64 = -1;

pub const DATA_FILE_EXTENSION: &str = "data";
pub const SIDECAR_EXTENSION: &str = "json";

// Fixed metadata vocabulary
pub const APPLICATION_FAMILY: &str = "lrs";
pub const APPLICATION_NAME: &str = "lrs_daq";
pub const DATA_TIER: &str = "raw";
pub const FILE_TYPE: &str = "detector";
pub const FILE_FORMAT: &str = "binary";
pub const FILE_CONTENT_STATUS: &str = "good";
pub const RETENTION_CLASS: &str = "rawdata";
pub const RETENTION_STATUS: &str = "active";
pub const DEFAULT_DATA_STREAM: &str = "commissioning";
pub const CALIBRATION_DATA_STREAM: &str = "calibration";

// Hardware topology
pub const PULSER_CHANNELS: usize = 16;
pub const BIAS_CHANNELS_PER_MODULE: u16 = 128;
pub const MAX_RESISTOR_SETTING: u16 = 255;
pub const TOPOLOGY_FILE_PREFIX: &str = "MOAS_";
pub const THRESHOLD_FILE_PREFIX: &str = "FOAS_";
pub const LED_RUNS_DIR: &str = "LEDRuns";
