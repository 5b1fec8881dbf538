
use log::info;

use super::channel::ChannelSummary;
use super::signal::{SNR_RESET_THRESHOLD_DBHZ, EL_RESET_MASK_DEG, WATCHDOG_GRACE_SEC, MIN_PLAUSIBLE_WEEK};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
	Healthy,
	Reset(&'static str),
}

/// Per-channel watchdog.  Once a channel has held an acquisition for the
/// grace period, sustained low SNR, a stalled nav decode or a satellite
/// below the reset mask send the channel back to Idle for a clean
/// reacquisition.
pub struct Supervisor {
	acquired_at: Option<f64>,
}

impl Supervisor {

	pub fn new() -> Self { Self { acquired_at: None } }

	/// Called once per worker loop with the receiver's elapsed time, the
	/// channel's visible flags and its last computed elevation (if any).
	pub fn check(&mut self, now_sec:f64, summary:&ChannelSummary, elevation_deg:Option<f64>) -> Verdict {
		if !summary.acquired {
			self.acquired_at = None;
			return Verdict::Healthy;
		}

		let t0 = *self.acquired_at.get_or_insert(now_sec);
		if now_sec - t0 <= WATCHDOG_GRACE_SEC { return Verdict::Healthy; }

		if summary.snr_dbhz < SNR_RESET_THRESHOLD_DBHZ {
			info!("{}: resetting, SNR {:.1} dB-Hz", summary.sat_id, summary.snr_dbhz);
			return Verdict::Reset("sustained low SNR");
		}

		if !summary.decoded || !summary.bit_synced || summary.week < MIN_PLAUSIBLE_WEEK {
			info!("{}: resetting, decoded:{} synced:{} week:{}",
				summary.sat_id, summary.decoded, summary.bit_synced, summary.week);
			return Verdict::Reset("nav decode stalled");
		}

		if let Some(el) = elevation_deg {
			if el < EL_RESET_MASK_DEG {
				info!("{}: resetting, elevation {:.1} deg", summary.sat_id, el);
				return Verdict::Reset("below elevation reset mask");
			}
		}

		Verdict::Healthy
	}

	/// Clears the watchdog timer after the worker rebuilt the channel.
	pub fn note_reset(&mut self) {
		self.acquired_at = None;
	}

}
