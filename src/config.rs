use std::time::Duration;

/// QMK's default raw HID usage tuple; every interface advertising it is
/// treated as a hub participant.
pub const QMK_USAGE_PAGE: u16 = 0xFF60;
pub const QMK_USAGE: u16 = 0x61;

/// How often Agent D reconciles the device table with the backend.
pub const DISCOVERY_PERIOD: Duration = Duration::from_secs(1);

/// Idle threshold before the relay loop starts sleeping between passes.
pub const SMART_SLEEP_WAIT: Duration = Duration::from_millis(100);

/// Default relay pass sleep. Roughly a 240 Hz tick; Windows timer
/// granularity makes anything below 1 ms meaningless there.
pub const SLEEP_STEP_MS: f64 = if cfg!(windows) { 1.0 } else { 4.166_666_67 };

/// How often the stats report is emitted when verbosity bit 2 is set.
pub const STATS_INTERVAL: Duration = Duration::from_millis(5000);

#[derive(clap::Parser, Debug, Clone)]
#[command(version, about)]
pub struct Config {
    /// Verbosity bitmask: 1 basic events, 2 periodic stats, 4 hub frames,
    /// 8 inter-device frames, 16 discarded frames.
    #[arg(short, default_value_t = 0)]
    pub verbose: u8,
    /// Never sleep between relay passes (busy loop).
    #[arg(long)]
    pub no_sleep: bool,
    /// Sleep after every pass instead of only when traffic has been idle.
    #[arg(long)]
    pub no_smart_sleep: bool,
    /// Sleep step in milliseconds (default 1.0 on Windows, 4.17 elsewhere).
    #[arg(long)]
    pub sleep_step_ms: Option<f64>,
}

/// Decoded verbosity bits. Copied around freely; every category gates its
/// own log sites.
#[derive(Debug, Clone, Copy, Default)]
pub struct Verbosity {
    pub basic: bool,
    pub stats: bool,
    pub hub_frames: bool,
    pub device_frames: bool,
    pub discarded: bool,
}

impl Verbosity {
    pub fn from_bits(bits: u8) -> Self {
        Self {
            basic: bits & 1 != 0,
            stats: bits & 2 != 0,
            hub_frames: bits & 4 != 0,
            device_frames: bits & 8 != 0,
            discarded: bits & 16 != 0,
        }
    }

    /// Coarse tracing level implied by the enabled bits.
    pub fn filter_directive(&self) -> &'static str {
        if self.hub_frames || self.device_frames || self.discarded {
            "trace"
        } else if self.basic || self.stats {
            "debug"
        } else {
            "info"
        }
    }
}
