
use std::collections::HashMap;
use std::fs::File;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use itertools::Itertools;
use log::{debug, error, info, warn};
use nalgebra::base::Vector4;
use serde::{Serialize, Deserialize};

use crate::DigSigProcErr;
use crate::io::{FileSource, SampleFormat, SharedSampleBuffer, RING_CAPACITY};

use crate::gnss::channel::{Channel, ChannelConfig, ChannelOutcome, ChannelState, ChannelSummary, ObservationInput};
use crate::gnss::observation::{Aligner, ObservationRecord, precheck};
use crate::gnss::pvt::{self, PositionFix};
use crate::gnss::signal::{SignalType, ACQ_RETRY_BACKOFF_MS, RESET_BACKOFF_MS};
use crate::gnss::supervisor::{Supervisor, Verdict};

/// Static receiver configuration: front-end description plus the channel
/// table, fixed for the whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverConfig {
	pub fs: f64,
	pub f_cf: f64,
	pub f_if: f64,
	pub format: SampleFormat,
	pub x0_ecef: (f64, f64, f64),
	pub channels: Vec<ChannelConfig>,
}

impl ReceiverConfig {

	fn with_signals(fs:f64, f_cf:f64, format:SampleFormat, signals:Vec<(SignalType, usize)>) -> Self {
		let channels = signals.into_iter().map(|(signal, prn)| ChannelConfig {
			signal, prn, fs, f_cf, f_if: 0.0,
			f_gain: 0, f_bias: 0, f_clock: 0,
			code_override: None,
		}).collect();
		Self {
			fs, f_cf, f_if: 0.0, format,
			x0_ecef: (693570.0, -5193930.0, 3624632.0),
			channels,
		}
	}

	/// All 32 GPS L1 C/A satellites.
	pub fn gps(fs:f64, format:SampleFormat) -> Self {
		Self::with_signals(fs, 1.57542e9, format, (1..=32).map(|prn| (SignalType::GpsL1Ca, prn)).collect())
	}

	/// The 14 GLONASS G1 frequency channels.
	pub fn glonass(fs:f64, format:SampleFormat) -> Self {
		Self::with_signals(fs, 1.602e9, format, (1..=14).map(|slot| (SignalType::GlonassG1, slot)).collect())
	}

	/// Galileo E1B for the PRNs present in the supplied memory-code table.
	pub fn galileo(fs:f64, format:SampleFormat, codes:HashMap<usize, Vec<i8>>) -> Self {
		let prns:Vec<usize> = codes.keys().cloned().sorted().collect();
		let mut cfg = Self::with_signals(fs, 1.57542e9, format, prns.iter().map(|prn| (SignalType::GalileoE1b, *prn)).collect());
		for chan in cfg.channels.iter_mut() {
			chan.code_override = codes.get(&chan.prn).cloned();
		}
		cfg
	}

}

/// Per-channel guarded slot: the owning worker writes, the supervisor,
/// aligner and reporter read copies.
#[derive(Default)]
struct ChannelSlot {
	summary: Option<ChannelSummary>,
	observation: Option<ObservationInput>,
	elevation_deg: Option<f64>,
}

/// The consolidated per-epoch state: the aligner writes the observation
/// set, the solver reads and annotates it under the same lock.
struct EpochState {
	obs: Vec<ObservationRecord>,
	fix: PositionFix,
	x: Vector4<f64>,
	azel_carry: HashMap<String, (f64, f64)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationSummary {
	pub sat_id: String,
	pub tow: f64,
	pub week: i32,
	pub snr_dbhz: f64,
	pub doppler_hz: f64,
	pub azimuth_deg: f64,
	pub elevation_deg: f64,
	pub residual_m: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverReport {
	pub elapsed_sec: f64,
	pub acquired: Vec<String>,
	pub bit_synced: Vec<String>,
	pub decoded: Vec<String>,
	pub fix: PositionFix,
	pub observations: Vec<ObservationSummary>,
}

pub struct Receiver {
	pub cfg: ReceiverConfig,
	stop: Arc<AtomicBool>,
	samples: Arc<SharedSampleBuffer>,
	slots: Arc<Vec<Mutex<ChannelSlot>>>,
	epoch: Arc<Mutex<EpochState>>,
	started: Instant,
}

impl Receiver {

	pub fn new(cfg:ReceiverConfig) -> Result<Self, DigSigProcErr> {
		// Channel construction is the allocation-heavy step; failing here
		// is fatal for the whole receiver
		for chan_cfg in &cfg.channels {
			Channel::new(chan_cfg)?;
		}

		let x0 = Vector4::new(cfg.x0_ecef.0, cfg.x0_ecef.1, cfg.x0_ecef.2, 0.0);
		let slots:Vec<Mutex<ChannelSlot>> = cfg.channels.iter().map(|_| Mutex::new(ChannelSlot::default())).collect();

		Ok(Self {
			cfg,
			stop: Arc::new(AtomicBool::new(false)),
			samples: Arc::new(SharedSampleBuffer::new(RING_CAPACITY)),
			slots: Arc::new(slots),
			epoch: Arc::new(Mutex::new(EpochState {
				obs: vec![],
				fix: PositionFix::none(),
				x: x0,
				azel_carry: HashMap::new(),
			})),
			started: Instant::now(),
		})
	}

	pub fn stop(&self) { self.stop.store(true, Ordering::SeqCst); }

	pub fn stopped(&self) -> bool { self.stop.load(Ordering::SeqCst) }

	pub fn elapsed_sec(&self) -> f64 { self.started.elapsed().as_secs_f64() }

	pub fn report(&self) -> ReceiverReport {
		let mut acquired = vec![];
		let mut bit_synced = vec![];
		let mut decoded = vec![];
		for slot in self.slots.iter() {
			if let Some(summary) = &slot.lock().unwrap().summary {
				if summary.acquired   { acquired.push(summary.sat_id.clone()); }
				if summary.bit_synced { bit_synced.push(summary.sat_id.clone()); }
				if summary.decoded    { decoded.push(summary.sat_id.clone()); }
			}
		}

		let ep = self.epoch.lock().unwrap();
		let observations = ep.obs.iter().map(|o| {
			let (az, el) = o.azel_deg.unwrap_or((0.0, 0.0));
			ObservationSummary {
				sat_id: o.sat_id.clone(),
				tow: o.tow,
				week: o.week,
				snr_dbhz: o.snr_dbhz,
				doppler_hz: o.doppler_hz,
				azimuth_deg: az,
				elevation_deg: el,
				residual_m: o.residual_m,
			}
		}).collect();

		ReceiverReport {
			elapsed_sec: self.elapsed_sec(),
			acquired, bit_synced, decoded,
			fix: ep.fix.clone(),
			observations,
		}
	}

	/// Runs the full receiver against an IF capture file: one feed thread,
	/// one worker per channel, one epoch thread, a once-per-second status
	/// report from this thread.  Returns when the file is exhausted or
	/// stop() is called.
	pub fn run_from_file(&self, path:&str) -> Result<(), DigSigProcErr> {
		let file = File::open(path).map_err(|_| DigSigProcErr::InvalidConfiguration("unable to open sample file"))?;
		let mut source = FileSource::new(file, self.cfg.format);

		let mut handles:Vec<thread::JoinHandle<()>> = vec![];

		// Sample feed, throttled to the nominal sample rate
		{
			let stop = self.stop.clone();
			let samples = self.samples.clone();
			let fs = self.cfg.fs;
			handles.push(thread::spawn(move || {
				while !stop.load(Ordering::SeqCst) {
					match source.next_block() {
						Ok(block) if block.is_empty() => {
							info!("sample stream exhausted");
							stop.store(true, Ordering::SeqCst);
						},
						Ok(block) => {
							let dt = Duration::from_secs_f64((block.len() as f64) / fs);
							samples.push_block(&block);
							thread::sleep(dt);
						},
						Err(e) => {
							error!("sample feed failed: {:?}", e);
							stop.store(true, Ordering::SeqCst);
						},
					}
				}
			}));
		}

		// One worker per channel
		for (idx, chan_cfg) in self.cfg.channels.iter().enumerate() {
			let stop = self.stop.clone();
			let samples = self.samples.clone();
			let slots = self.slots.clone();
			let chan_cfg = chan_cfg.clone();
			let started = self.started;
			handles.push(thread::spawn(move || {
				channel_worker(idx, chan_cfg, stop, samples, slots, started);
			}));
		}

		// Epoch alignment and PVT
		{
			let stop = self.stop.clone();
			let slots = self.slots.clone();
			let epoch = self.epoch.clone();
			handles.push(thread::spawn(move || {
				epoch_worker(stop, slots, epoch);
			}));
		}

		// Periodic status reporting until the workers wind down
		while !self.stop.load(Ordering::SeqCst) {
			thread::sleep(Duration::from_millis(1000));
			let report = self.report();
			match serde_json::to_string(&report) {
				Ok(json) => info!("status {}", json),
				Err(_) => warn!("status report serialization failed"),
			}
		}

		for handle in handles {
			let _ = handle.join();
		}
		Ok(())
	}

}

fn channel_worker(idx:usize, cfg:ChannelConfig, stop:Arc<AtomicBool>,
                  samples:Arc<SharedSampleBuffer>, slots:Arc<Vec<Mutex<ChannelSlot>>>,
                  started:Instant) {
	let mut channel = match Channel::new(&cfg) {
		Ok(c) => c,
		Err(e) => {
			error!("channel {} failed to initialize: {:?}", idx, e);
			stop.store(true, Ordering::SeqCst);
			return;
		},
	};
	channel.start();
	let mut supervisor = Supervisor::new();

	while !stop.load(Ordering::SeqCst) {
		let now = started.elapsed().as_secs_f64();

		let elevation = slots[idx].lock().unwrap().elevation_deg;
		if let Verdict::Reset(reason) = supervisor.check(now, &channel.summary(), elevation) {
			warn!("{}: supervisor reset ({}), reacquiring in {} ms", channel.sat_id, reason, RESET_BACKOFF_MS);
			channel = match Channel::new(&cfg) {
				Ok(c) => c,
				Err(e) => {
					error!("channel {} failed to reinitialize: {:?}", idx, e);
					stop.store(true, Ordering::SeqCst);
					return;
				},
			};
			channel.start();
			supervisor.note_reset();
			{
				let mut slot = slots[idx].lock().unwrap();
				slot.summary = Some(channel.summary());
				slot.observation = None;
				slot.elevation_deg = None;
			}
			sleep_unless_stopped(&stop, RESET_BACKOFF_MS);
			continue;
		}

		let outcome = match channel.state {
			ChannelState::Idle | ChannelState::Acquiring => channel.try_acquire(&samples),
			_ => channel.update(&samples),
		};

		{
			let mut slot = slots[idx].lock().unwrap();
			slot.summary = Some(channel.summary());
			slot.observation = channel.observation_input();
		}

		match outcome {
			ChannelOutcome::NeedSamples     => thread::sleep(Duration::from_millis(1)),
			ChannelOutcome::AcquisitionMiss => sleep_unless_stopped(&stop, ACQ_RETRY_BACKOFF_MS),
			_ => {},
		}
	}
	debug!("{}: channel worker finished", channel.sat_id);
}

fn epoch_worker(stop:Arc<AtomicBool>, slots:Arc<Vec<Mutex<ChannelSlot>>>, epoch:Arc<Mutex<EpochState>>) {
	let mut aligner = Aligner::new();

	while !stop.load(Ordering::SeqCst) {
		let inputs:Vec<ObservationInput> = slots.iter()
			.filter_map(|slot| slot.lock().unwrap().observation.clone())
			.collect();

		if let Some(mut obs) = aligner.align(&inputs) {
			// Elevations survive across epochs so the precheck mask and the
			// weighting see the last solved geometry
			let x0 = {
				let ep = epoch.lock().unwrap();
				for o in obs.iter_mut() {
					if let Some(azel) = ep.azel_carry.get(&o.sat_id) {
						o.azel_deg = Some(*azel);
					}
				}
				ep.x
			};

			precheck(&mut obs);

			let solved = pvt::solve(&mut obs, &x0);
			let mut ep = epoch.lock().unwrap();
			match solved {
				Ok((fix, x)) => {
					info!("fix: {:.5} deg lat, {:.5} deg lon, {:.1} m, gdop {:.2}, {} SVs",
						fix.lat_deg, fix.lon_deg, fix.height_m, fix.gdop, fix.sv_count);
					ep.x[3] = x[3];
					for o in &obs {
						if let Some(azel) = o.azel_deg {
							ep.azel_carry.insert(o.sat_id.clone(), azel);
						}
					}
					for slot in slots.iter() {
						let mut slot = slot.lock().unwrap();
						let sat_id = slot.summary.as_ref().map(|s| s.sat_id.clone());
						if let Some(sat_id) = sat_id {
							slot.elevation_deg = obs.iter()
								.find(|o| o.sat_id == sat_id)
								.and_then(|o| o.azel_deg)
								.map(|(_, el)| el);
						}
					}
					ep.fix = fix;
				},
				Err(e) => {
					debug!("no fix this epoch: {:?}", e);
					ep.fix = PositionFix::none();
				},
			}
			ep.obs = obs;
		}

		thread::sleep(Duration::from_millis(2));
	}
}

fn sleep_unless_stopped(stop:&AtomicBool, total_ms:u64) {
	let mut remaining = total_ms;
	while remaining > 0 && !stop.load(Ordering::SeqCst) {
		let step = remaining.min(100);
		thread::sleep(Duration::from_millis(step));
		remaining -= step;
	}
}
