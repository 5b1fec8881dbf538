
use std::sync::Arc;
use std::f64::consts;

use rustfft::{FFTplanner, FFT};
use rustfft::num_complex::Complex;
use rustfft::num_traits::Zero;

use crate::utils::{max_excluding, mean_excluding};

use super::signal_modulation;

#[derive(Debug, Clone, Copy)]
pub struct AcquisitionResult {
	pub code_phase: usize,
	pub doppler_hz: f64,
	pub cn0_dbhz: f64,
	pub peak_ratio: f64,
}

/// FFT-based parallel code-phase search over a Doppler grid.  One
/// instance per channel; power accumulates non-coherently across windows
/// until the configured integration count, then the caller evaluates the
/// detection statistics and either seeds tracking or backs off.
pub struct Acquisition {
	pub fs: f64,
	pub prn: usize,
	pub nsamp: usize,
	pub nsamp_chip: usize,
	pub n_integrations: usize,
	pub doppler_freqs: Vec<f64>,
	len_fft: usize,
	coh_time: f64,
	fft: Arc<dyn FFT<f64>>,
	ifft: Arc<dyn FFT<f64>>,
	local_code_freq_domain: Vec<Complex<f64>>,
	power: Vec<f64>,
	integrations_done: usize,
}

impl Acquisition {

	pub fn new(code_chips:&[i8], code_rate_hz:f64, fs:f64, prn:usize,
	           doppler_center_hz:f64, half_band_hz:f64, step_hz:f64,
	           n_integrations:usize) -> Self {

		let ctime:f64 = (code_chips.len() as f64) / code_rate_hz;
		let nsamp:usize = (fs * ctime).round() as usize;
		let nsamp_chip:usize = nsamp / code_chips.len();
		let len_fft:usize = 2 * nsamp;

		let n_side:usize = (half_band_hz / step_hz) as usize;
		let doppler_freqs:Vec<f64> = (0..(2*n_side+1))
			.map(|i| doppler_center_hz + ((i as f64) - (n_side as f64))*step_hz)
			.collect();

		// One code period sampled at fs, zero-padded to the FFT length
		let sampled:Vec<i8> = signal_modulation::sample_code(code_chips, code_rate_hz, fs, nsamp);
		let mut local_code_time_domain:Vec<Complex<f64>> = sampled.into_iter()
			.map(|b| Complex{ re: b as f64, im: 0.0 })
			.chain((0..(len_fft - nsamp)).map(|_| Complex::zero()))
			.collect();

		let mut planner = FFTplanner::new(false);
		let fft = planner.plan_fft(len_fft);
		let mut fft_out:Vec<Complex<f64>> = vec![Complex::zero(); len_fft];
		fft.process(&mut local_code_time_domain, &mut fft_out);
		let local_code_freq_domain:Vec<Complex<f64>> = fft_out.iter().map(|p| p.conj()).collect();

		let mut inv_planner = FFTplanner::new(true);
		let ifft = inv_planner.plan_fft(len_fft);

		let nfreq = doppler_freqs.len();
		Self { fs, prn, nsamp, nsamp_chip, n_integrations, doppler_freqs,
			len_fft, coh_time: ctime, fft, ifft, local_code_freq_domain,
			power: vec![0.0; nfreq * nsamp], integrations_done: 0 }
	}

	pub fn window_len(&self) -> usize { self.len_fft }

	pub fn integrations_done(&self) -> usize { self.integrations_done }

	/// Adds one two-code-period window to the non-coherent power surface.
	pub fn accumulate(&mut self, window:&[Complex<f64>]) {
		for (freq_idx, freq) in self.doppler_freqs.iter().enumerate() {

			// Wipe the candidate carrier off the window
			let phase_step_rad:f64 = (-2.0 * consts::PI * freq) / self.fs;
			let mut wiped:Vec<Complex<f64>> = window.iter().take(self.len_fft).enumerate()
				.map(|(idx, s)| {
					let phase = phase_step_rad * (idx as f64);
					s * Complex{ re: phase.cos(), im: phase.sin() }
				}).collect();
			wiped.resize(self.len_fft, Complex::zero());

			let mut freq_domain:Vec<Complex<f64>> = vec![Complex::zero(); self.len_fft];
			self.fft.process(&mut wiped, &mut freq_domain);

			// Multiplication by the conjugate code spectrum is circular
			// correlation in the time domain
			let mut product:Vec<Complex<f64>> = freq_domain.iter()
				.zip(self.local_code_freq_domain.iter())
				.map(|(a, b)| a * b)
				.collect();
			let mut corr:Vec<Complex<f64>> = vec![Complex::zero(); self.len_fft];
			self.ifft.process(&mut product, &mut corr);

			let scale:f64 = 1.0 / (self.len_fft as f64);
			for i in 0..self.nsamp {
				self.power[freq_idx*self.nsamp + i] += (corr[i] * scale).norm_sqr();
			}
		}
		self.integrations_done += 1;
	}

	/// Detection statistics of the current power surface: global peak,
	/// noise floor and second peak outside a +/-2 chip exclusion window
	/// around the peak on its own frequency row.
	pub fn check(&self) -> AcquisitionResult {
		let (peak, peak_idx) = max_excluding(&self.power, None);
		let code_phase = peak_idx % self.nsamp;
		let freq_idx = peak_idx / self.nsamp;

		let mut exinds:i64 = code_phase as i64 - 2*(self.nsamp_chip as i64);
		if exinds < 0 { exinds += self.nsamp as i64; }
		let mut exinde:i64 = code_phase as i64 + 2*(self.nsamp_chip as i64);
		if exinde >= self.nsamp as i64 { exinde -= self.nsamp as i64; }
		let excl = Some((exinds as usize, exinde as usize));

		let row = &self.power[freq_idx*self.nsamp .. (freq_idx+1)*self.nsamp];
		let noise_floor = mean_excluding(row, excl);
		let (second_peak, _) = max_excluding(row, excl);

		let cn0_dbhz = 10.0 * (peak / noise_floor / self.coh_time).log10();
		let peak_ratio = if second_peak > 0.0 { peak / second_peak } else { 0.0 };

		AcquisitionResult { code_phase, doppler_hz: self.doppler_freqs[freq_idx], cn0_dbhz, peak_ratio }
	}

	/// Clears the power surface for a fresh attempt.
	pub fn reset(&mut self) {
		for p in self.power.iter_mut() { *p = 0.0; }
		self.integrations_done = 0;
	}

}

#[cfg(test)]
mod tests {

	use super::*;
	use crate::gnss::signal_modulation::ca_code;

	fn synthetic_window(chips:&[i8], fs:f64, doppler_hz:f64, code_offset:usize, n:usize) -> Vec<Complex<f64>> {
		let sampled = signal_modulation::sample_code(chips, 1.023e6, fs, n/2);
		(0..n).map(|i| {
			let chip = sampled[(i + n - code_offset) % (n/2)] as f64;
			let phase = 2.0 * consts::PI * doppler_hz * (i as f64) / fs;
			Complex{ re: chip * phase.cos(), im: chip * phase.sin() }
		}).collect()
	}

	#[test]
	fn detects_code_phase_and_doppler() {
		let fs:f64 = 2.048e6;
		let chips = ca_code(4).unwrap();
		let mut acq = Acquisition::new(&chips, 1.023e6, fs, 4, 0.0, 1000.0, 200.0, 1);

		let true_offset:usize = 513;
		let window = synthetic_window(&chips, fs, 400.0, true_offset, acq.window_len());
		acq.accumulate(&window);
		let result = acq.check();

		assert!(result.peak_ratio > 3.0);
		assert_eq!(result.code_phase, true_offset);
		assert!((result.doppler_hz - 400.0).abs() < 1.0e-9);
		assert!(result.cn0_dbhz > 40.0);
	}

	#[test]
	fn search_is_deterministic() {
		let fs:f64 = 2.048e6;
		let chips = ca_code(9).unwrap();
		let window = synthetic_window(&chips, fs, -600.0, 100, 2*2048);

		let mut first:Option<(usize, f64, f64)> = None;
		for _ in 0..2 {
			let mut acq = Acquisition::new(&chips, 1.023e6, fs, 9, 0.0, 1000.0, 200.0, 1);
			acq.accumulate(&window);
			let r = acq.check();
			match first {
				None => first = Some((r.code_phase, r.doppler_hz, r.peak_ratio)),
				Some((cp, d, pr)) => {
					assert_eq!(cp, r.code_phase);
					assert_eq!(d, r.doppler_hz);
					assert_eq!(pr, r.peak_ratio);
				},
			}
		}
	}

	#[test]
	fn non_coherent_integration_pulls_signal_out_of_noise() {
		use rand::SeedableRng;
		use rand::rngs::StdRng;
		use rand_distr::{Distribution, Normal};

		let fs:f64 = 2.048e6;
		let chips = ca_code(17).unwrap();
		let mut acq = Acquisition::new(&chips, 1.023e6, fs, 17, 0.0, 1000.0, 200.0, 10);

		let mut rng = StdRng::seed_from_u64(7);
		let normal = Normal::new(0.0, 2.0).unwrap();
		let true_offset:usize = 777;

		for _ in 0..acq.n_integrations {
			let mut window = synthetic_window(&chips, fs, 0.0, true_offset, acq.window_len());
			for s in window.iter_mut() {
				s.re += normal.sample(&mut rng);
				s.im += normal.sample(&mut rng);
			}
			acq.accumulate(&window);
		}

		let result = acq.check();
		assert!(result.peak_ratio > 3.0, "peak ratio {}", result.peak_ratio);
		assert_eq!(result.code_phase, true_offset);
	}

	#[test]
	fn absent_signal_stays_below_threshold() {
		let fs:f64 = 2.048e6;
		let chips = ca_code(4).unwrap();
		let other = ca_code(23).unwrap();
		let mut acq = Acquisition::new(&chips, 1.023e6, fs, 4, 0.0, 1000.0, 200.0, 1);

		// A different satellite's code should not produce a dominant peak
		let window = synthetic_window(&other, fs, 0.0, 0, acq.window_len());
		acq.accumulate(&window);
		let result = acq.check();
		assert!(result.peak_ratio < 3.0);
	}

}
