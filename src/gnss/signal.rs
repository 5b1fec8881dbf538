
use serde::{Serialize, Deserialize};

use crate::filters::LoopBandwidths;

// Acquisition search grid and detection
pub const ACQ_HBAND_HZ:f64 = 7000.0;
pub const ACQ_STEP_HZ:f64 = 200.0;
pub const ACQ_PEAK_RATIO_THRESHOLD:f64 = 3.0;
pub const ACQ_RETRY_BACKOFF_MS:u64 = 2000;

// Nav-bit synchronization
pub const BIT_SYNC_THRESHOLD:u32 = 50;
pub const SYNC_WARMUP_MS:f64 = 2000.0;

// Tracking loop bandwidths before and after bit sync
pub const BW_UNSYNCED:LoopBandwidths = LoopBandwidths{ dll_hz: 5.0, pll_hz: 30.0, fll_hz: 200.0 };
pub const BW_SYNCED:LoopBandwidths   = LoopBandwidths{ dll_hz: 2.0, pll_hz: 20.0, fll_hz: 50.0 };

// Correlator geometry: tap pairs at +/- k sample spacings, discriminator
// on the first pair
pub const CORR_TAP_PAIRS:usize = 4;
pub const CORR_SPACING_SAMPLES:usize = 1;

// SNR smoothing window
pub const SNR_SMOOTH_MS:usize = 100;

// Supervisor thresholds
pub const SNR_RESET_THRESHOLD_DBHZ:f64 = 15.0;
pub const SNR_PVT_THRESHOLD_DBHZ:f64 = 19.0;
pub const EL_PVT_MASK_DEG:f64 = 15.0;
pub const EL_RESET_MASK_DEG:f64 = 12.0;
pub const WATCHDOG_GRACE_SEC:f64 = 60.0;
pub const RESET_BACKOFF_MS:u64 = 10_000;

// Oldest week number considered a plausible decode
pub const MIN_PLAUSIBLE_WEEK:i32 = 2360;

// Observation epoch alignment
pub const OBS_OUTPUT_INTERVAL_MS:usize = 200;
pub const OBS_INTERP_DEPTH:usize = 8;
pub const NOMINAL_TRANSIT_MS:f64 = 68.802;

// GLONASS FDMA plan
pub const FREQ1_GLO:f64 = 1.60200e9;
pub const DFRQ1_GLO:f64 = 0.5625e6;

pub const GPS_L1_HZ:f64 = 1.57542e9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalType {
	GpsL1Ca,
	SbasL1,
	GalileoE1b,
	GlonassG1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum System {
	Gps,
	Sbas,
	Galileo,
	Glonass,
}

/// Everything about a signal that the acquisition, tracking and telemetry
/// stages branch on, resolved once at channel creation.
#[derive(Debug, Clone, Copy)]
pub struct SignalDescriptor {
	pub code_len_chips: usize,
	pub code_rate_hz: f64,
	/// Code periods per navigation symbol
	pub nav_rate: usize,
	/// Frame length in symbols
	pub frame_len: usize,
	/// Extra symbols kept ahead of the frame (e.g. trailing parity of the
	/// previous word needed by the GPS parity equations)
	pub frame_extra: usize,
	pub preamble: &'static [i8],
	/// Non-coherent integrations in one acquisition attempt
	pub acq_integrations: usize,
	/// Code periods accumulated per loop-filter update
	pub accum_periods: usize,
	/// Frames required before an ephemeris set can complete
	pub eph_count_threshold: usize,
	/// Code periods between decode attempts once frame sync holds
	pub decode_interval: usize,
}

const PRE_L1CA:[i8; 8] = [-1, 1, 1, 1, -1, 1, -1, -1];
const PRE_SBAS:[i8; 24] = [ 1, -1,  1, -1,  1,  1, -1, -1,
                           -1,  1,  1, -1, -1,  1, -1,  1,
                           -1, -1,  1,  1,  1, -1, -1,  1];
const PRE_E1B:[i8; 10] = [1, -1, 1, -1, -1, 1, 1, 1, 1, 1];
const PRE_G1:[i8; 30] = [-1, -1, -1, -1, -1,  1,  1,  1, -1, -1,
                          1, -1, -1, -1,  1, -1,  1, -1,  1,  1,
                          1,  1, -1,  1,  1, -1,  1, -1, -1,  1];

impl SignalType {

	pub fn system(&self) -> System {
		match self {
			SignalType::GpsL1Ca    => System::Gps,
			SignalType::SbasL1     => System::Sbas,
			SignalType::GalileoE1b => System::Galileo,
			SignalType::GlonassG1  => System::Glonass,
		}
	}

	pub fn descriptor(&self) -> SignalDescriptor {
		match self {
			SignalType::GpsL1Ca => SignalDescriptor {
				code_len_chips: 1023, code_rate_hz: 1.023e6,
				nav_rate: 20, frame_len: 300, frame_extra: 2, preamble: &PRE_L1CA,
				acq_integrations: 10, accum_periods: 10, eph_count_threshold: 3,
				decode_interval: 300*20,
			},
			SignalType::SbasL1 => SignalDescriptor {
				code_len_chips: 1023, code_rate_hz: 1.023e6,
				nav_rate: 2, frame_len: 1500, frame_extra: 12, preamble: &PRE_SBAS,
				acq_integrations: 10, accum_periods: 2, eph_count_threshold: 3,
				decode_interval: 1500/3*2,
			},
			SignalType::GalileoE1b => SignalDescriptor {
				code_len_chips: 4092, code_rate_hz: 1.023e6,
				nav_rate: 1, frame_len: 500, frame_extra: 0, preamble: &PRE_E1B,
				acq_integrations: 4, accum_periods: 1, eph_count_threshold: 5,
				decode_interval: 500,
			},
			SignalType::GlonassG1 => SignalDescriptor {
				code_len_chips: 511, code_rate_hz: 0.511e6,
				nav_rate: 10, frame_len: 200, frame_extra: 0, preamble: &PRE_G1,
				acq_integrations: 10, accum_periods: 10, eph_count_threshold: 5,
				decode_interval: 200*10,
			},
		}
	}

	/// Code period [sec]
	pub fn code_period(&self) -> f64 {
		let d = self.descriptor();
		(d.code_len_chips as f64) / d.code_rate_hz
	}

	/// Broadcast carrier frequency; GLONASS depends on the FDMA slot
	pub fn carrier_freq_hz(&self, prn:usize) -> f64 {
		match self {
			SignalType::GlonassG1 => FREQ1_GLO + DFRQ1_GLO*(Self::glonass_freq_number(prn) as f64),
			_                     => GPS_L1_HZ,
		}
	}

	/// Channel index 1..14 to GLONASS frequency number -7..+6
	pub fn glonass_freq_number(prn:usize) -> i32 { (prn as i32) - 8 }

	/// Satellite id string in the conventional single-letter form
	pub fn sat_id(&self, prn:usize) -> String {
		match self.system() {
			System::Gps     => format!("G{:02}", prn),
			System::Sbas    => format!("S{}", prn),
			System::Galileo => format!("E{:02}", prn),
			System::Glonass => format!("R{:02}", prn),
		}
	}

}
