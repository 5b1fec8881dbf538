
use std::collections::VecDeque;
use std::f64::consts;

use log::{debug, info};
use serde::{Serialize, Deserialize};

use crate::DigSigProcErr;
use crate::io::SharedSampleBuffer;

use crate::gnss::acquisition::Acquisition;
use crate::gnss::ephemeris::Ephemeris;
use crate::gnss::signal::{SignalType, ACQ_HBAND_HZ, ACQ_STEP_HZ, ACQ_PEAK_RATIO_THRESHOLD,
	BW_UNSYNCED, BW_SYNCED, CORR_TAP_PAIRS, CORR_SPACING_SAMPLES, SNR_SMOOTH_MS,
	OBS_OUTPUT_INTERVAL_MS};
use crate::gnss::signal_modulation;
use crate::gnss::telemetry::{NavDecoder, NavEvent};
use crate::gnss::tracking::{Tracking, TrackingParams};

/// Static per-channel configuration, immutable for the channel's life;
/// a supervisor reset rebuilds the channel from the same values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
	pub signal: SignalType,
	pub prn: usize,
	pub fs: f64,
	/// Front-end center frequency
	pub f_cf: f64,
	pub f_if: f64,
	pub f_gain: i32,
	pub f_bias: i32,
	pub f_clock: i32,
	/// Caller-supplied spreading code for signals whose codes are not
	/// generated (Galileo E1B memory codes)
	pub code_override: Option<Vec<i8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelState {
	Idle,
	Acquiring,
	TrackingUnsynced,
	TrackingSynced,
	Decoding,
}

/// One entry of the tracking history ring the observation aligner
/// interpolates over.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrackingSnapshot {
	pub tow: f64,
	pub code_sample_idx: u64,
	pub rem_code_samples: f64,
	pub carrier_cycles: f64,
	pub doppler_hz: f64,
	pub snr_dbhz: f64,
	pub cnt: u64,
}

/// Externally visible channel flags, copied out under lock for the
/// supervisor, aligner and status reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSummary {
	pub prn: usize,
	pub signal: SignalType,
	pub sat_id: String,
	pub state: ChannelState,
	pub acquired: bool,
	pub bit_synced: bool,
	pub frame_synced: bool,
	pub decoded: bool,
	pub week: i32,
	pub snr_dbhz: f64,
	pub doppler_hz: f64,
	pub acq_cn0_dbhz: f64,
	pub acq_peak_ratio: f64,
}

/// Everything the aligner needs from one channel at an epoch, copied as
/// a snapshot so the numerical work happens outside any lock.
#[derive(Debug, Clone)]
pub struct ObservationInput {
	pub prn: usize,
	pub signal: SignalType,
	pub week: i32,
	pub ephemeris: Ephemeris,
	pub snapshots: Vec<TrackingSnapshot>,
	pub firstsf: u64,
	pub firstsfcnt: u64,
	pub nsamp: usize,
	pub ctime: f64,
	pub ti: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOutcome {
	/// Not enough buffered samples; the worker should sleep briefly
	NeedSamples,
	/// Acquisition ran its full integration count without a detection
	AcquisitionMiss,
	Acquired,
	Tracked,
}

pub struct Channel {
	pub cfg: ChannelConfig,
	pub state: ChannelState,
	pub sat_id: String,

	acq: Acquisition,
	trk: Tracking,
	nav: NavDecoder,

	nsamp: usize,
	ctime: f64,
	freq_offset_hz: f64,

	buffloc: u64,
	cnt: u64,
	accum_periods: usize,

	narrowband: bool,
	carrier_cycles: f64,
	flag_remcarr_applied: bool,
	flag_polarity_applied: bool,

	snapshots: VecDeque<TrackingSnapshot>,
	snapshot_depth: usize,

	last_acq_cn0: f64,
	last_acq_peak_ratio: f64,
}

impl Channel {

	pub fn new(cfg:&ChannelConfig) -> Result<Self, DigSigProcErr> {
		let signal = cfg.signal;
		let descriptor = signal.descriptor();

		let code:Vec<i8> = match &cfg.code_override {
			Some(chips) => {
				if chips.len() != descriptor.code_len_chips {
					return Err(DigSigProcErr::InvalidConfiguration("code override has the wrong chip count"));
				}
				chips.clone()
			},
			None => signal_modulation::local_code(signal, cfg.prn)?,
		};

		let ctime = signal.code_period();
		let nsamp = (cfg.fs * ctime).round() as usize;
		let freq_offset_hz = signal.carrier_freq_hz(cfg.prn) - cfg.f_cf;

		let acq = Acquisition::new(&code, descriptor.code_rate_hz, cfg.fs, cfg.prn,
			cfg.f_if + freq_offset_hz, ACQ_HBAND_HZ, ACQ_STEP_HZ, descriptor.acq_integrations);

		let prm1 = TrackingParams::from_bandwidths(BW_UNSYNCED);
		let code_period_ms = ((ctime * 1000.0).round() as usize).max(1);
		let prompt_window = SNR_SMOOTH_MS / code_period_ms;
		let trk = Tracking::new(code, descriptor.code_rate_hz, cfg.fs,
			signal.carrier_freq_hz(cfg.prn), cfg.f_if, freq_offset_hz,
			prm1, CORR_TAP_PAIRS, CORR_SPACING_SAMPLES, prompt_window.max(20));

		let nav = NavDecoder::new(signal, cfg.prn);

		let accum_ms = (descriptor.accum_periods as f64) * ctime * 1000.0;
		let snapshot_depth = ((2.0 * OBS_OUTPUT_INTERVAL_MS as f64 / accum_ms).ceil() as usize).max(16).min(128);

		Ok(Self {
			cfg: cfg.clone(),
			state: ChannelState::Idle,
			sat_id: signal.sat_id(cfg.prn),
			acq, trk, nav,
			nsamp, ctime, freq_offset_hz,
			buffloc: 0, cnt: 0,
			accum_periods: descriptor.accum_periods,
			narrowband: false,
			carrier_cycles: 0.0,
			flag_remcarr_applied: false,
			flag_polarity_applied: false,
			snapshots: VecDeque::new(),
			snapshot_depth,
			last_acq_cn0: 0.0,
			last_acq_peak_ratio: 0.0,
		})
	}

	pub fn start(&mut self) {
		if self.state == ChannelState::Idle {
			self.state = ChannelState::Acquiring;
		}
	}

	pub fn snr_dbhz(&self) -> f64 { self.trk.snr_dbhz }

	pub fn summary(&self) -> ChannelSummary {
		ChannelSummary {
			prn: self.cfg.prn,
			signal: self.cfg.signal,
			sat_id: self.sat_id.clone(),
			state: self.state,
			acquired: self.state != ChannelState::Idle && self.state != ChannelState::Acquiring,
			bit_synced: self.nav.flagsync,
			frame_synced: self.nav.flagsyncf,
			decoded: self.nav.flagdec,
			week: self.nav.week(),
			snr_dbhz: self.trk.snr_dbhz,
			doppler_hz: self.trk.doppler_hz(),
			acq_cn0_dbhz: self.last_acq_cn0,
			acq_peak_ratio: self.last_acq_peak_ratio,
		}
	}

	/// The aligner's view of this channel, available once the nav data is
	/// decoded and an ephemeris set has completed.
	pub fn observation_input(&self) -> Option<ObservationInput> {
		if !self.nav.flagdec || self.nav.week() == 0 { return None; }
		let ephemeris = self.nav.ephemeris()?;
		Some(ObservationInput {
			prn: self.cfg.prn,
			signal: self.cfg.signal,
			week: self.nav.week(),
			ephemeris,
			snapshots: self.snapshots.iter().cloned().collect(),
			firstsf: self.nav.firstsf,
			firstsfcnt: self.nav.firstsfcnt,
			nsamp: self.nsamp,
			ctime: self.ctime,
			ti: 1.0 / self.cfg.fs,
		})
	}

	/// One acquisition attempt over the freshest samples: accumulates the
	/// configured number of code periods and tests the detection statistic
	/// after each.
	pub fn try_acquire(&mut self, samples:&SharedSampleBuffer) -> ChannelOutcome {
		self.state = ChannelState::Acquiring;

		let needed = ((self.acq.n_integrations + 1) * self.nsamp) as u64;
		let count = samples.count();
		if count < needed + self.nsamp as u64 { return ChannelOutcome::NeedSamples; }

		let mut buffloc = count - needed;
		self.acq.reset();

		for i in 0..self.acq.n_integrations {
			let window = match samples.window(buffloc, 2*self.nsamp) {
				Some(w) => w,
				None => return ChannelOutcome::NeedSamples,
			};
			buffloc += self.nsamp as u64;

			self.acq.accumulate(&window);
			let result = self.acq.check();
			if result.peak_ratio > ACQ_PEAK_RATIO_THRESHOLD {
				self.last_acq_cn0 = result.cn0_dbhz;
				self.last_acq_peak_ratio = result.peak_ratio;

				// Rewind to the start of the detected code period
				self.buffloc = buffloc - ((i + 1) * self.nsamp) as u64 + result.code_phase as u64;
				self.trk.initialize(result.doppler_hz);
				self.state = ChannelState::TrackingUnsynced;
				self.narrowband = false;
				self.cnt = 0;
				self.carrier_cycles = 0.0;
				self.flag_remcarr_applied = false;
				self.flag_polarity_applied = false;
				self.snapshots.clear();

				info!("{}: acquired at {:.1} Hz doppler, C/N0 {:.1} dB-Hz, peak ratio {:.2}",
					self.sat_id, result.doppler_hz - self.cfg.f_if - self.freq_offset_hz,
					result.cn0_dbhz, result.peak_ratio);
				return ChannelOutcome::Acquired;
			}
		}

		debug!("{}: acquisition miss (peak ratio {:.2})", self.sat_id, self.acq.check().peak_ratio);
		ChannelOutcome::AcquisitionMiss
	}

	/// One tracking update (one code period), feeding the nav decoder and
	/// running the loop filters at the stage-appropriate cadence.
	pub fn update(&mut self, samples:&SharedSampleBuffer) -> ChannelOutcome {
		let n = self.trk.current_nsamp();
		let count = samples.count();
		if self.buffloc + (n as u64) + (self.nsamp as u64) > count {
			return ChannelOutcome::NeedSamples;
		}

		let window = match samples.window(self.buffloc, n) {
			Some(w) => w,
			None => {
				// Fell behind the ring; jump forward and keep tracking
				self.buffloc = count - 2*(self.nsamp as u64);
				return ChannelOutcome::NeedSamples;
			},
		};

		let period_start = self.buffloc;
		self.trk.correlate(&window);

		let prompt_i = self.trk.ii[0];
		let old_prompt_i = self.trk.old_i[0];
		match self.nav.update(prompt_i, old_prompt_i, period_start, self.cnt) {
			NavEvent::BitSync => {
				info!("{}: nav bit sync", self.sat_id);
			},
			NavEvent::PreambleFound => {
				info!("{}: frame sync, polarity {}", self.sat_id, self.nav.polarity);
			},
			NavEvent::FrameDecoded(id) => {
				debug!("{}: frame {} decoded, tow {:.1}, week {}",
					self.sat_id, id, self.nav.tow_gpst(), self.nav.week());
			},
			NavEvent::FrameSyncLost => {
				debug!("{}: frame sync dropped", self.sat_id);
			},
			NavEvent::None => {},
		}

		self.trk.accumulate();
		if !self.nav.flagsync {
			self.trk.pll(self.ctime);
			self.trk.dll(self.ctime);
			self.trk.clear_accumulation();
		} else if self.nav.swloop {
			if !self.narrowband {
				self.trk.retune(TrackingParams::from_bandwidths(BW_SYNCED));
				self.narrowband = true;
			}
			let dt = (self.accum_periods as f64) * self.ctime;
			self.trk.pll(dt);
			self.trk.dll(dt);
			self.push_snapshot(period_start, n);
			self.trk.clear_accumulation();
		}

		self.state = if self.nav.flagdec { ChannelState::Decoding }
			else if self.nav.flagsync { ChannelState::TrackingSynced }
			else { ChannelState::TrackingUnsynced };

		self.cnt += 1;
		self.buffloc += n as u64;
		ChannelOutcome::Tracked
	}

	/// Appends a tracking snapshot for the observation aligner, mirroring
	/// the carrier-phase bookkeeping of the loop cadence.
	fn push_snapshot(&mut self, period_start:u64, n:usize) {
		let doppler = -(self.trk.carr_freq - self.cfg.f_if - self.freq_offset_hz);

		if !self.flag_remcarr_applied {
			self.carrier_cycles -= self.trk.carrier_phase_rad() / (2.0 * consts::PI);
			self.flag_remcarr_applied = true;
		}
		if self.nav.flagsyncf && !self.flag_polarity_applied {
			if self.nav.polarity == 1 {
				self.carrier_cycles += 0.5;
			}
			self.flag_polarity_applied = true;
		}
		self.carrier_cycles += doppler * ((self.accum_periods * n) as f64) / self.cfg.fs;

		let tow = self.nav.firstsftow + ((self.cnt - self.nav.firstsfcnt) as f64) * self.ctime;
		let snapshot = TrackingSnapshot {
			tow,
			code_sample_idx: period_start,
			rem_code_samples: self.trk.old_rem_code * self.cfg.fs / self.trk.code_freq,
			carrier_cycles: self.carrier_cycles,
			doppler_hz: doppler,
			snr_dbhz: self.trk.snr_dbhz,
			cnt: self.cnt,
		};
		self.snapshots.push_back(snapshot);
		while self.snapshots.len() > self.snapshot_depth {
			self.snapshots.pop_front();
		}
	}

}
