
use std::collections::VecDeque;
use std::f64::consts;

use rustfft::num_complex::Complex;
use serde::{Serialize, Deserialize};

use crate::filters::{LoopBandwidths, LoopCoeffs, LoopFilter};

/// Coefficient pair for one stage of the tracking loops.
#[derive(Debug, Clone, Copy)]
pub struct TrackingParams {
	pub pll: LoopCoeffs,
	pub dll: LoopCoeffs,
}

impl TrackingParams {

	pub fn from_bandwidths(bw:LoopBandwidths) -> Self {
		Self {
			pll: LoopCoeffs::from_bandwidths(bw.pll_hz, bw.fll_hz),
			dll: LoopCoeffs::from_bandwidths(bw.dll_hz, 0.0),
		}
	}

}

#[derive(Debug, Serialize, Deserialize)]
pub struct TrackingDebug {
	pub carrier_hz: f64,
	pub code_freq_hz: f64,
	pub prompt_i: f64,
	pub prompt_q: f64,
	pub carr_err: f64,
	pub code_err: f64,
	pub freq_err: f64,
	pub snr_dbhz: f64,
}

/// Carrier and code tracking for one channel: multi-tap correlators, a
/// Costas phase discriminator with frequency-lock assist, and a
/// normalized early-minus-late envelope code discriminator feeding
/// second-order loop filters.
pub struct Tracking {
	pub fs: f64,
	ti: f64,
	code: Vec<i8>,
	clen: usize,
	nominal_code_rate: f64,
	carrier_hz: f64,
	if_hz: f64,
	freq_offset_hz: f64,

	pub carr_freq: f64,
	pub code_freq: f64,
	rem_carr: f64,
	pub rem_code: f64,
	pub old_rem_code: f64,
	acq_freq: f64,

	carr_filter: LoopFilter,
	code_filter: LoopFilter,
	carr_err: f64,
	code_err: f64,
	freq_err: f64,

	n_pairs: usize,
	spacing: usize,
	ne: usize,
	nl: usize,
	pub ii: Vec<f64>,
	pub qq: Vec<f64>,
	pub old_i: Vec<f64>,
	pub old_q: Vec<f64>,
	sum_i: Vec<f64>,
	sum_q: Vec<f64>,
	old_sum_i: Vec<f64>,
	old_sum_q: Vec<f64>,

	prompt_buffer: VecDeque<Complex<f64>>,
	prompt_buffer_len: usize,
	pub snr_dbhz: f64,
}

impl Tracking {

	pub fn new(code:Vec<i8>, code_rate_hz:f64, fs:f64, carrier_hz:f64, if_hz:f64,
	           freq_offset_hz:f64, prm1:TrackingParams, n_pairs:usize, spacing:usize,
	           prompt_buffer_len:usize) -> Self {
		let clen = code.len();
		let n_taps = 1 + 2*n_pairs;
		Self {
			fs, ti: 1.0/fs, code, clen, nominal_code_rate: code_rate_hz,
			carrier_hz, if_hz, freq_offset_hz,
			carr_freq: if_hz + freq_offset_hz, code_freq: code_rate_hz,
			rem_carr: 0.0, rem_code: 0.0, old_rem_code: 0.0, acq_freq: 0.0,
			carr_filter: LoopFilter::new(prm1.pll),
			code_filter: LoopFilter::new(prm1.dll),
			carr_err: 0.0, code_err: 0.0, freq_err: 0.0,
			n_pairs, spacing, ne: 1, nl: 2,
			ii: vec![0.0; n_taps], qq: vec![0.0; n_taps],
			old_i: vec![0.0; n_taps], old_q: vec![0.0; n_taps],
			sum_i: vec![0.0; n_taps], sum_q: vec![0.0; n_taps],
			old_sum_i: vec![0.0; n_taps], old_sum_q: vec![0.0; n_taps],
			prompt_buffer: VecDeque::new(), prompt_buffer_len, snr_dbhz: 0.0,
		}
	}

	pub fn carrier_freq_hz(&self) -> f64 { self.carr_freq }
	pub fn carrier_phase_rad(&self) -> f64 { self.rem_carr }
	pub fn doppler_hz(&self) -> f64 { self.carr_freq - self.if_hz - self.freq_offset_hz }
	pub fn prompt(&self) -> Complex<f64> { Complex{ re: self.ii[0], im: self.qq[0] } }

	pub fn debug(&self) -> TrackingDebug {
		TrackingDebug {
			carrier_hz: self.carr_freq,
			code_freq_hz: self.code_freq,
			prompt_i: self.ii[0],
			prompt_q: self.qq[0],
			carr_err: self.carr_err,
			code_err: self.code_err,
			freq_err: self.freq_err,
			snr_dbhz: self.snr_dbhz,
		}
	}

	/// Seeds the NCOs from an acquisition result; the frequency is the
	/// absolute NCO frequency (IF plus slot offset plus Doppler).
	pub fn initialize(&mut self, acq_freq_hz:f64) {
		self.acq_freq = acq_freq_hz;
		self.carr_freq = self.acq_freq;
		self.code_freq = self.nominal_code_rate;
		self.rem_carr = 0.0;
		self.rem_code = 0.0;
		self.old_rem_code = 0.0;
		self.carr_filter.initialize();
		self.code_filter.initialize();
		self.carr_err = 0.0;
		self.code_err = 0.0;
		self.freq_err = 0.0;
		for v in [&mut self.ii, &mut self.qq, &mut self.old_i, &mut self.old_q,
		          &mut self.sum_i, &mut self.sum_q, &mut self.old_sum_i, &mut self.old_sum_q].iter_mut() {
			for x in v.iter_mut() { *x = 0.0; }
		}
		self.prompt_buffer.clear();
		self.snr_dbhz = 0.0;
	}

	/// Number of samples left in the current code period at the current
	/// code frequency.
	pub fn current_nsamp(&self) -> usize {
		let ci = self.code_freq * self.ti;
		(((self.clen as f64) - self.rem_code) / ci).ceil() as usize
	}

	/// Switches the loop-filter coefficients (NCO state carries over).
	pub fn retune(&mut self, prm:TrackingParams) {
		self.carr_filter.retune(prm.pll);
		self.code_filter.retune(prm.dll);
	}

	/// Correlates one code period of samples against the local replica at
	/// every tap, advancing both NCO phases.
	pub fn correlate(&mut self, window:&[Complex<f64>]) {
		let n = window.len();
		let smax = self.n_pairs * self.spacing;
		let n_taps = 1 + 2*self.n_pairs;

		self.old_i.copy_from_slice(&self.ii);
		self.old_q.copy_from_slice(&self.qq);
		self.old_rem_code = self.rem_code;

		// Carrier wipe-off
		let dphi = 2.0 * consts::PI * self.carr_freq * self.ti;
		let mut xi:Vec<f64> = Vec::with_capacity(n);
		let mut xq:Vec<f64> = Vec::with_capacity(n);
		for (k, s) in window.iter().enumerate() {
			let phase = self.rem_carr + dphi * (k as f64);
			let (sin, cos) = phase.sin_cos();
			xi.push(s.re*cos + s.im*sin);
			xq.push(-s.re*sin + s.im*cos);
		}
		self.rem_carr = (self.rem_carr + dphi * (n as f64)) % (2.0 * consts::PI);

		// Code replica resampled across the full tap span
		let ci = self.code_freq * self.ti;
		let lenf = self.clen as f64;
		let ext:Vec<i8> = (0..(n + 2*smax)).map(|p| {
			let phase = self.rem_code + (((p as f64) - (smax as f64)) * ci);
			let mut idx = phase % lenf;
			if idx < 0.0 { idx += lenf; }
			self.code[idx as usize]
		}).collect();

		for tap in 0..n_taps {
			// Tap layout: [P, E1, L1, E2, L2, ...]
			let offset:i64 = match tap {
				0 => 0,
				t if t % 2 == 1 => -(((t+1)/2 * self.spacing) as i64),
				t               =>  ((t/2 * self.spacing) as i64),
			};
			let base = (smax as i64 + offset) as usize;
			let mut acc_i = 0.0;
			let mut acc_q = 0.0;
			for k in 0..n {
				let c = ext[base + k] as f64;
				acc_i += xi[k] * c;
				acc_q += xq[k] * c;
			}
			self.ii[tap] = acc_i;
			self.qq[tap] = acc_q;
		}

		// Advance the code phase into the next period
		self.rem_code = (self.rem_code + (n as f64)*ci) % lenf;

		self.prompt_buffer.push_back(self.prompt());
		while self.prompt_buffer.len() > self.prompt_buffer_len {
			self.prompt_buffer.pop_front();
		}
		if self.prompt_buffer.len() == self.prompt_buffer_len {
			self.snr_dbhz = cn0_svn_estimator(&self.prompt_buffer, (self.clen as f64)/self.nominal_code_rate);
		}
	}

	/// Adds the current correlator outputs to the accumulation interval.
	pub fn accumulate(&mut self) {
		for i in 0..self.ii.len() {
			self.old_sum_i[i] += self.old_i[i];
			self.old_sum_q[i] += self.old_q[i];
			self.sum_i[i] += self.ii[i];
			self.sum_q[i] += self.qq[i];
		}
	}

	pub fn clear_accumulation(&mut self) {
		for i in 0..self.ii.len() {
			self.old_sum_i[i] = 0.0;
			self.old_sum_q[i] = 0.0;
			self.sum_i[i] = 0.0;
			self.sum_q[i] = 0.0;
		}
	}

	/// Costas discriminator with frequency-lock assist; updates the
	/// carrier NCO frequency.
	pub fn pll(&mut self, dt:f64) {
		let ip = self.sum_i[0];
		let qp = self.sum_q[0];
		let old_ip = self.old_sum_i[0];
		let old_qp = self.old_sum_q[0];

		let carr_err = if ip > 0.0 { qp.atan2(ip) / consts::PI }
			else { (-qp).atan2(-ip) / consts::PI };

		let f1 = if ip == 0.0     { consts::PI/2.0 } else { (qp/ip).atan() };
		let f2 = if old_ip == 0.0 { consts::PI/2.0 } else { (old_qp/old_ip).atan() };
		let mut freq_err = f1 - f2;
		if freq_err >  consts::PI/2.0 { freq_err =  consts::PI - freq_err; }
		if freq_err < -consts::PI/2.0 { freq_err = -consts::PI - freq_err; }

		let nco = self.carr_filter.apply_with_freq_assist(carr_err, freq_err, dt);
		self.carr_freq = self.acq_freq + nco;
		self.carr_err = carr_err;
		self.freq_err = freq_err;
	}

	/// Normalized early-minus-late envelope discriminator; updates the
	/// carrier-aided code NCO frequency.
	pub fn dll(&mut self, dt:f64) {
		let e = (self.sum_i[self.ne].powi(2) + self.sum_q[self.ne].powi(2)).sqrt();
		let l = (self.sum_i[self.nl].powi(2) + self.sum_q[self.nl].powi(2)).sqrt();
		let code_err = if e + l == 0.0 { 0.0 } else { (e - l) / (e + l) };

		let nco = self.code_filter.apply(code_err, dt);
		self.code_freq = self.nominal_code_rate - nco
			+ (self.carr_freq - self.if_hz - self.freq_offset_hz) / (self.carrier_hz / self.nominal_code_rate);
		self.code_err = code_err;
	}

}

/// C/N0 estimate from a buffer of prompt correlator outputs.
pub fn cn0_svn_estimator(prompt_buffer:&VecDeque<Complex<f64>>, coh_integration_time_s:f64) -> f64 {
	let n:f64 = prompt_buffer.len() as f64;
	let p_sig:f64 = {
		let sum:f64 = prompt_buffer.iter().map(|c| c.re.abs()).sum();
		(sum / n).powi(2)
	};
	let p_tot:f64 = {
		let sum:f64 = prompt_buffer.iter().map(|c| c.re*c.re + c.im*c.im).sum();
		sum / n
	};
	if p_tot <= p_sig { return 0.0; }
	let snr = p_sig / (p_tot - p_sig);
	10.0 * snr.log10() - 10.0 * coh_integration_time_s.log10()
}

#[cfg(test)]
mod tests {

	use super::*;
	use crate::gnss::signal::{BW_UNSYNCED, GPS_L1_HZ};
	use crate::gnss::signal_modulation::ca_code;

	struct SignalSim {
		chips: Vec<i8>,
		fs: f64,
		doppler_hz: f64,
		k: u64,
	}

	impl SignalSim {

		fn window(&mut self, n:usize) -> Vec<Complex<f64>> {
			let code_rate = 1.023e6 * (1.0 + self.doppler_hz/GPS_L1_HZ);
			(0..n).map(|_| {
				let t = (self.k as f64) / self.fs;
				self.k += 1;
				let chip = self.chips[((t * code_rate) as usize) % 1023] as f64;
				let phase = 2.0 * consts::PI * self.doppler_hz * t;
				Complex{ re: chip * phase.cos(), im: chip * phase.sin() }
			}).collect()
		}

	}

	#[test]
	fn loop_converges_on_noiseless_signal() {
		let fs:f64 = 4.092e6;
		let doppler:f64 = 1000.0;
		let chips = ca_code(7).unwrap();
		let prm = TrackingParams::from_bandwidths(BW_UNSYNCED);
		let mut trk = Tracking::new(chips.clone(), 1.023e6, fs, GPS_L1_HZ, 0.0, 0.0, prm, 4, 1, 100);

		// Seed 40 Hz off the true Doppler, code phase aligned
		trk.initialize(doppler - 40.0);

		let mut sim = SignalSim{ chips, fs, doppler_hz: doppler, k: 0 };
		let mut freq_errs:Vec<f64> = vec![];
		for _ in 0..400 {
			let n = trk.current_nsamp();
			let window = sim.window(n);
			trk.correlate(&window);
			trk.accumulate();
			trk.pll(0.001);
			trk.dll(0.001);
			trk.clear_accumulation();
			freq_errs.push((trk.doppler_hz() - doppler).abs());
		}

		// Converged and stayed bounded afterwards
		let tail_max = freq_errs[300..].iter().cloned().fold(0.0, f64::max);
		assert!(tail_max < 5.0, "carrier error stayed at {} Hz", tail_max);
		assert!(trk.code_err.abs() < 0.05);
		assert!(trk.carr_err.abs() < 0.05);
	}

	#[test]
	fn cn0_estimator_reports_strong_signal() {
		let mut buffer:VecDeque<Complex<f64>> = VecDeque::new();
		for i in 0..100 {
			let noise = if i % 2 == 0 { 0.5 } else { -0.5 };
			buffer.push_back(Complex{ re: 100.0, im: noise });
		}
		let cn0 = cn0_svn_estimator(&buffer, 0.001);
		assert!(cn0 > 40.0);
	}

}
