
use log::{debug, warn};
use serde::{Serialize, Deserialize};

use crate::utils::lagrange_interp;

use super::channel::ObservationInput;
use super::ephemeris::{C, Ephemeris};
use super::signal::{System, OBS_OUTPUT_INTERVAL_MS, OBS_INTERP_DEPTH, NOMINAL_TRANSIT_MS,
	SNR_PVT_THRESHOLD_DBHZ, EL_PVT_MASK_DEG, MIN_PLAUSIBLE_WEEK};

/// Pseudoranges outside the plausible transit window are discarded.
pub const PR_LOW_M:f64 = 0.0;
pub const PR_HIGH_M:f64 = 92.0e-3 * C;

/// One satellite's measurements at an aligned epoch.  Satellite position,
/// azimuth/elevation and the residual are annotated by the PVT solver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationRecord {
	pub prn: usize,
	pub system: System,
	pub sat_id: String,
	pub tow: f64,
	pub week: i32,
	pub pseudorange_m: f64,
	pub carrier_cycles: f64,
	pub doppler_hz: f64,
	pub snr_dbhz: f64,
	pub ephemeris: Ephemeris,
	pub sat_pos_ecef: (f64, f64, f64),
	pub azel_deg: Option<(f64, f64)>,
	pub residual_m: f64,
}

/// Builds one consistent observation set per output epoch by
/// interpolating each channel's tracking history onto a common reference
/// time, with pseudoranges relative to the earliest-arriving channel.
pub struct Aligner {
	out_interval_ms: usize,
	last_reftow: f64,
}

impl Aligner {

	pub fn new() -> Self {
		Self { out_interval_ms: OBS_OUTPUT_INTERVAL_MS, last_reftow: 0.0 }
	}

	/// Returns one record per ready channel, or None when no channel is
	/// ready, the epoch repeats, or the reference time is off the output
	/// grid.
	pub fn align(&mut self, inputs:&[ObservationInput]) -> Option<Vec<ObservationRecord>> {
		let ready:Vec<&ObservationInput> = inputs.iter()
			.filter(|i| i.week != 0 && !i.snapshots.is_empty())
			.collect();
		if ready.is_empty() { return None; }

		// Reference epoch: the smallest current time of week across the
		// ready channels, on the output grid, not yet emitted
		let reftow = ready.iter()
			.map(|i| i.snapshots.last().unwrap().tow)
			.fold(std::f64::MAX, f64::min);
		if reftow == self.last_reftow { return None; }
		if ((reftow * 1000.0).round() as i64) % (self.out_interval_ms as i64) != 0 { return None; }
		self.last_reftow = reftow;

		// Each channel's history entry at the reference epoch
		let mut aligned:Vec<(&ObservationInput, usize)> = vec![];
		for input in ready.iter() {
			match input.snapshots.iter().position(|s| (s.tow - reftow).abs() < 1.0e-4) {
				Some(ind) => aligned.push((*input, ind)),
				None => debug!("{}: no tracking history at reftow {:.3}", input.signal.sat_id(input.prn), reftow),
			}
		}
		if aligned.is_empty() { return None; }

		// The channel whose aligned sample index is smallest anchors the
		// epoch; its first-frame timing gives the common receive time
		let (ref_input, ref_ind) = *aligned.iter()
			.min_by_key(|(input, ind)| input.snapshots[*ind].code_sample_idx)
			.unwrap();

		let diffcnt = ref_input.snapshots[ref_ind].cnt - ref_input.firstsfcnt;
		let sampref:f64 = (ref_input.firstsf as f64)
			+ (ref_input.nsamp as f64) * ((diffcnt as f64) - NOMINAL_TRANSIT_MS/(1000.0*ref_input.ctime));
		let sampbase:f64 = ref_input.snapshots.first().unwrap().code_sample_idx as f64;

		let mut ans:Vec<ObservationRecord> = vec![];
		for (input, ind) in aligned {
			let at_ref = &input.snapshots[ind];
			let pseudorange_m = C * input.ti * (((at_ref.code_sample_idx as f64) - sampref) - at_ref.rem_code_samples);

			// Carrier phase and Doppler interpolated to the exact epoch
			let xs:Vec<f64> = input.snapshots.iter().map(|s| (s.code_sample_idx as f64) - sampbase).collect();
			let carrier:Vec<f64> = input.snapshots.iter().map(|s| s.carrier_cycles).collect();
			let doppler:Vec<f64> = input.snapshots.iter().map(|s| s.doppler_hz).collect();
			let t = sampref - sampbase;
			let (wxs, wcarrier, wdoppler) = interp_window(&xs, &carrier, &doppler, t);

			ans.push(ObservationRecord {
				prn: input.prn,
				system: input.signal.system(),
				sat_id: input.signal.sat_id(input.prn),
				tow: reftow + NOMINAL_TRANSIT_MS/1000.0,
				week: input.week,
				pseudorange_m,
				carrier_cycles: lagrange_interp(&wxs, &wcarrier, t),
				doppler_hz: lagrange_interp(&wxs, &wdoppler, t),
				snr_dbhz: at_ref.snr_dbhz,
				ephemeris: input.ephemeris,
				sat_pos_ecef: (0.0, 0.0, 0.0),
				azel_deg: None,
				residual_m: 0.0,
			});
		}
		Some(ans)
	}

}

/// Picks the interpolation nodes bracketing the target so the polynomial
/// order stays at the configured depth regardless of the ring length.
fn interp_window(xs:&[f64], ys1:&[f64], ys2:&[f64], t:f64) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
	let n = xs.len();
	if n <= OBS_INTERP_DEPTH {
		return (xs.to_vec(), ys1.to_vec(), ys2.to_vec());
	}
	let above = xs.iter().position(|x| *x >= t).unwrap_or(n);
	let half = OBS_INTERP_DEPTH / 2;
	let start = if above <= half { 0 } else { (above - half).min(n - OBS_INTERP_DEPTH) };
	let end = start + OBS_INTERP_DEPTH;
	(xs[start..end].to_vec(), ys1[start..end].to_vec(), ys2[start..end].to_vec())
}

/// Drops observations that must not reach the solver.  Re-running the
/// filter on an already-filtered set is a no-op.
pub fn precheck(obs:&mut Vec<ObservationRecord>) {
	obs.retain(|o| {
		if o.snr_dbhz < SNR_PVT_THRESHOLD_DBHZ {
			debug!("{}: dropped from PVT, SNR {:.1}", o.sat_id, o.snr_dbhz);
			return false;
		}
		if o.week < MIN_PLAUSIBLE_WEEK {
			debug!("{}: dropped from PVT, week {}", o.sat_id, o.week);
			return false;
		}
		if o.tow < 1.0 {
			debug!("{}: dropped from PVT, tow {:.1}", o.sat_id, o.tow);
			return false;
		}
		if o.pseudorange_m < PR_LOW_M || o.pseudorange_m > PR_HIGH_M {
			debug!("{}: dropped from PVT, pseudorange {:.0} m", o.sat_id, o.pseudorange_m);
			return false;
		}
		if !o.ephemeris.is_usable() {
			warn!("{}: dropped from PVT, ephemeris not usable", o.sat_id);
			return false;
		}
		if let Some((_, el)) = o.azel_deg {
			if el < EL_PVT_MASK_DEG {
				debug!("{}: dropped from PVT, elevation {:.1} deg", o.sat_id, el);
				return false;
			}
		}
		true
	});
}
