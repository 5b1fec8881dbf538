
use log::warn;
use nalgebra as na;
use serde::{Serialize, Deserialize};

use self::na::base::{DMatrix, DVector, Matrix4, Vector4};

use crate::DigSigProcErr;
use crate::utils::kinematics;

use crate::gnss::ephemeris::{C, OMEGA_E};
use crate::gnss::observation::ObservationRecord;

pub const SV_COUNT_THRESHOLD:usize = 4;
pub const MAX_ITER:usize = 10;
pub const DET_TOL:f64 = 1.0e-12;
pub const CONV_TOL:f64 = 1.0e-4;

/// Measurement variance [m^2] at high elevation; inflated below 30 deg.
const VAR_BASE:f64 = 25.0;
const EL_PENALTY_KNEE_DEG:f64 = 30.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionFix {
	pub pos_ecef: (f64, f64, f64),
	pub clock_bias_m: f64,
	pub gdop: f64,
	pub lat_deg: f64,
	pub lon_deg: f64,
	pub height_m: f64,
	pub sv_count: usize,
	pub tow: f64,
	pub week: i32,
	pub residuals: Vec<(String, f64)>,
}

impl PositionFix {

	/// The zeroed fix published when a cycle aborts.
	pub fn none() -> Self {
		Self {
			pos_ecef: (0.0, 0.0, 0.0), clock_bias_m: 0.0, gdop: 0.0,
			lat_deg: 0.0, lon_deg: 0.0, height_m: 0.0,
			sv_count: 0, tow: 0.0, week: 0, residuals: vec![],
		}
	}

}

fn elevation_variance(el_deg:f64) -> f64 {
	if el_deg < EL_PENALTY_KNEE_DEG {
		let penalty = 25.0 - (25.0/15.0)*(el_deg - 15.0);
		VAR_BASE + penalty*penalty
	} else {
		VAR_BASE
	}
}

/// Iterative weighted least squares over one epoch's observations.
/// `x0` carries the static initial position and the previous epoch's
/// clock-bias estimate.  Satellite positions, azimuth/elevation and
/// residuals are written back into the records.
pub fn solve(obs:&mut Vec<ObservationRecord>, x0:&Vector4<f64>) -> Result<(PositionFix, Vector4<f64>), DigSigProcErr> {
	let n = obs.len();
	if n < SV_COUNT_THRESHOLD {
		return Err(DigSigProcErr::NoSolution("fewer than four valid observations"));
	}

	let rcvr_tow:f64 = obs[0].tow;

	// Satellite state at transmit time; the satellite clock correction is
	// applied to the pseudorange up front
	let mut sat_pos:Vec<(f64, f64, f64)> = Vec::with_capacity(n);
	let mut pr_corr:Vec<f64> = Vec::with_capacity(n);
	for ob in obs.iter_mut() {
		let tau = (ob.pseudorange_m - x0[3]) / C;
		let (pos, clk) = ob.ephemeris.pos_and_clock(rcvr_tow - tau)?;
		ob.sat_pos_ecef = pos;
		sat_pos.push(pos);
		pr_corr.push(ob.pseudorange_m + C*clk);
	}

	// Diagonal inverse-variance weights from the last known elevations
	let weights:Vec<f64> = obs.iter().map(|ob| {
		match ob.azel_deg {
			Some((_, el)) => 1.0 / elevation_variance(el),
			None          => 1.0 / VAR_BASE,
		}
	}).collect();
	let w = DMatrix::from_diagonal(&DVector::from_vec(weights.clone()));

	let mut pos = Vector4::new(x0[0], x0[1], x0[2], 0.0);
	let mut h = DMatrix::from_element(n, 4, 0.0);
	let mut v = DVector::from_element(n, 0.0);
	let mut iata4 = Matrix4::zeros();

	for iter in 0..MAX_ITER {
		for i in 0..n {
			let (rot_x, trop) = if iter == 0 {
				// No usable geometry yet: unrotated satellite, nominal delay
				(sat_pos[i], 2.0)
			} else {
				let dx = (sat_pos[i].0 - pos[0], sat_pos[i].1 - pos[1], sat_pos[i].2 - pos[2]);
				let travel_time = (dx.0*dx.0 + dx.1*dx.1 + dx.2*dx.2).sqrt() / C;

				// Earth turned while the signal was in flight
				let omegatau = OMEGA_E * travel_time;
				let rot_x = (
					 omegatau.cos()*sat_pos[i].0 + omegatau.sin()*sat_pos[i].1,
					-omegatau.sin()*sat_pos[i].0 + omegatau.cos()*sat_pos[i].1,
					 sat_pos[i].2,
				);

				let here = (pos[0], pos[1], pos[2]);
				let los = (rot_x.0 - pos[0], rot_x.1 - pos[1], rot_x.2 - pos[2]);
				let (az, el, _) = kinematics::topocentric(here, los);
				obs[i].azel_deg = Some((az, el));
				obs[i].sat_pos_ecef = rot_x;

				let trop = kinematics::tropo_delay(el.to_radians().sin(), 0.0, 1013.0, 293.0, 50.0, 0.0, 0.0, 0.0);
				(rot_x, trop)
			};

			let dx = (rot_x.0 - pos[0], rot_x.1 - pos[1], rot_x.2 - pos[2]);
			let rho = (dx.0*dx.0 + dx.1*dx.1 + dx.2*dx.2).sqrt();

			v[i] = pr_corr[i] - rho - pos[3] - trop;
			h[(i, 0)] = -dx.0 / rho;
			h[(i, 1)] = -dx.1 / rho;
			h[(i, 2)] = -dx.2 / rho;
			h[(i, 3)] = 1.0;
		}

		let ata = h.tr_mul(&h);
		let ata4 = Matrix4::from_fn(|i, j| ata[(i, j)]);
		if ata4.determinant().abs() < DET_TOL {
			warn!("PVT geometry is singular, aborting cycle");
			return Err(DigSigProcErr::NoSolution("singular geometry"));
		}
		iata4 = match ata4.try_inverse() {
			Some(m) => m,
			None => return Err(DigSigProcErr::NoSolution("singular geometry")),
		};

		let atwa = h.tr_mul(&(&w * &h));
		let atwa4 = Matrix4::from_fn(|i, j| atwa[(i, j)]);
		let iatwa4 = match atwa4.try_inverse() {
			Some(m) => m,
			None => return Err(DigSigProcErr::NoSolution("singular weighted geometry")),
		};

		let atwv = h.tr_mul(&(&w * &v));
		let atwv4 = Vector4::new(atwv[(0, 0)], atwv[(1, 0)], atwv[(2, 0)], atwv[(3, 0)]);
		let dx = iatwa4 * atwv4;

		pos += dx;
		if dx.norm() < CONV_TOL { break; }
	}

	if pos.iter().any(|x| !x.is_finite()) || v.iter().any(|x| !x.is_finite()) {
		return Err(DigSigProcErr::NoSolution("solution or residual is not finite"));
	}

	let gdop = iata4.trace().sqrt();
	for (i, ob) in obs.iter_mut().enumerate() {
		ob.residual_m = v[i];
	}

	let geo = kinematics::ecef_to_wgs84(pos[0], pos[1], pos[2]);
	let fix = PositionFix {
		pos_ecef: (pos[0], pos[1], pos[2]),
		clock_bias_m: pos[3],
		gdop,
		lat_deg: geo.latitude.to_degrees(),
		lon_deg: geo.longitude.to_degrees(),
		height_m: geo.height_above_ellipsoid,
		sv_count: n,
		tow: rcvr_tow,
		week: obs[0].week,
		residuals: obs.iter().map(|o| (o.sat_id.clone(), o.residual_m)).collect(),
	};
	Ok((fix, pos))
}

#[cfg(test)]
mod tests {

	use super::*;
	use crate::gnss::ephemeris::Ephemeris;
	use crate::gnss::ephemeris::test_support::synthetic_kepler;
	use crate::gnss::signal::System;

	const X_TRUE:(f64, f64, f64) = (693570.0, -5193930.0, 3624632.0);

	/// Builds a pseudorange consistent with the solver's own measurement
	/// model (transmit-time satellite state, Earth-rotation correction,
	/// elevation-dependent troposphere, satellite clock).
	fn forward_observation(prn:usize, eph:Ephemeris, rcvr_tow:f64) -> ObservationRecord {
		let mut pr:f64 = 0.070 * C;
		for _ in 0..8 {
			let tau = pr / C;
			let (pos, clk) = eph.pos_and_clock(rcvr_tow - tau).unwrap();

			let dx = (pos.0 - X_TRUE.0, pos.1 - X_TRUE.1, pos.2 - X_TRUE.2);
			let travel_time = (dx.0*dx.0 + dx.1*dx.1 + dx.2*dx.2).sqrt() / C;
			let omegatau = OMEGA_E * travel_time;
			let rot = (
				 omegatau.cos()*pos.0 + omegatau.sin()*pos.1,
				-omegatau.sin()*pos.0 + omegatau.cos()*pos.1,
				 pos.2,
			);

			let los = (rot.0 - X_TRUE.0, rot.1 - X_TRUE.1, rot.2 - X_TRUE.2);
			let (_, el, range) = kinematics::topocentric(X_TRUE, los);
			let trop = kinematics::tropo_delay(el.to_radians().sin(), 0.0, 1013.0, 293.0, 50.0, 0.0, 0.0, 0.0);

			pr = range + trop - C*clk;
		}

		ObservationRecord {
			prn,
			system: System::Gps,
			sat_id: format!("G{:02}", prn),
			tow: rcvr_tow,
			week: 2365,
			pseudorange_m: pr,
			carrier_cycles: 0.0,
			doppler_hz: 0.0,
			snr_dbhz: 45.0,
			ephemeris: eph,
			sat_pos_ecef: (0.0, 0.0, 0.0),
			azel_deg: None,
			residual_m: 0.0,
		}
	}

	fn constellation(rcvr_tow:f64) -> Vec<ObservationRecord> {
		let orbit_slots:[(f64, f64); 6] = [
			(0.4, 1.2), (1.5, 1.2), (2.6, 2.25),
			(3.7, 2.25), (4.8, 3.3), (5.9, 3.3),
		];
		orbit_slots.iter().enumerate().map(|(k, (m0, omg0))| {
			let mut eph = synthetic_kepler(*m0);
			eph.omg0 = *omg0;
			forward_observation(k+1, Ephemeris::Kepler(eph), rcvr_tow)
		}).collect()
	}

	#[test]
	fn recovers_known_position_with_six_satellites() {
		let mut obs = constellation(302500.0);
		let x0 = Vector4::new(0.0, 0.0, 0.0, 0.0);

		let (fix, x) = solve(&mut obs, &x0).unwrap();

		let err = ((fix.pos_ecef.0 - X_TRUE.0).powi(2)
			+ (fix.pos_ecef.1 - X_TRUE.1).powi(2)
			+ (fix.pos_ecef.2 - X_TRUE.2).powi(2)).sqrt();
		assert!(err < 1.0, "position error {} m", err);
		assert!(fix.clock_bias_m.abs() < 1.0, "clock bias {} m", fix.clock_bias_m);
		assert!(fix.gdop.is_finite() && fix.gdop > 0.0);
		assert_eq!(fix.sv_count, 6);
		assert!(x[3].abs() < 1.0);

		// Residuals of a noiseless consistent scenario collapse
		for (_, r) in &fix.residuals {
			assert!(r.abs() < 0.5, "residual {}", r);
		}
	}

	#[test]
	fn too_few_observations_is_an_error() {
		let mut obs = constellation(302500.0);
		obs.truncate(3);
		let x0 = Vector4::new(0.0, 0.0, 0.0, 0.0);
		assert!(solve(&mut obs, &x0).is_err());
	}

	#[test]
	fn weights_penalize_low_elevation() {
		assert!(elevation_variance(10.0) > elevation_variance(35.0));
		assert_eq!(elevation_variance(45.0), VAR_BASE);
		// Continuous at the knee
		assert!((elevation_variance(30.0) - VAR_BASE).abs() < 1.0e-9);
	}

	#[test]
	fn annotates_observations_with_azel_and_residuals() {
		let mut obs = constellation(302500.0);
		let x0 = Vector4::new(0.0, 0.0, 0.0, 0.0);
		solve(&mut obs, &x0).unwrap();
		for ob in &obs {
			assert!(ob.azel_deg.is_some());
			assert!(ob.sat_pos_ecef.0.abs() > 1.0e6);
		}
	}

}
