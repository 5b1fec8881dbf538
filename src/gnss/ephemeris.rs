
use serde::{Serialize, Deserialize};

use crate::DigSigProcErr;

pub const MU:f64 = 3.986005e14;              // [m^3/s^2] WGS-84 earth gravitational constant
pub const OMEGA_E:f64 = 7.2921151467e-5;     // [rad/s] WGS-84 earth rotation rate
pub const C:f64 = 2.99792458e8;              // [m/s] speed of light

pub const HALF_WEEK_SEC:f64 = 302400.0;
pub const WEEK_SEC:f64 = 604800.0;

/// Applies the half-week rollover to a time difference within one GPS week.
pub fn time_diff_wrapped(dt:f64) -> f64 {
	if dt > HALF_WEEK_SEC       { dt - WEEK_SEC }
	else if dt < -HALF_WEEK_SEC { dt + WEEK_SEC }
	else                        { dt }
}

/// Broadcast Keplerian parameters (GPS L1 C/A and Galileo I/NAV).  Angles
/// are stored in radians, times in seconds of week.
#[derive(Debug, Default, Serialize, Deserialize, Clone, Copy)]
pub struct KeplerEphemeris {
	pub week:i32,   pub iodc:i32,   pub iode:i32,
	pub sva:u8,     pub svh:u8,     pub fit:bool,
	pub toes:f64,   pub toc:f64,
	pub a:f64,      pub e:f64,      pub m0:f64,     pub omg:f64,
	pub i0:f64,     pub omg0:f64,   pub deln:f64,   pub idot:f64,
	pub omgd:f64,
	pub cuc:f64,    pub cus:f64,    pub crc:f64,    pub crs:f64,
	pub cic:f64,    pub cis:f64,
	pub f0:f64,     pub f1:f64,     pub f2:f64,     pub tgd:f64,
}

impl KeplerEphemeris {

	/// ECEF position and clock correction at transmit time t [sec of week].
	pub fn pos_and_clock(&self, t:f64) -> ((f64, f64, f64), f64) {
		let a:f64 = self.a;
		let n0:f64 = (MU / (a*a*a)).sqrt();
		let tk:f64 = time_diff_wrapped(t - self.toes);
		let n:f64 = n0 + self.deln;

		let mk:f64 = self.m0 + n*tk;

		// Fixed-point solve for the eccentric anomaly
		let mut ek:f64 = mk;
		for _ in 0..3 {
			ek = ek + (mk - ek + self.e*ek.sin()) / (1.0 - self.e*ek.cos());
		}

		let vk:f64 = 2.0 * (((1.0 + self.e)/(1.0 - self.e)).sqrt() * (ek/2.0).tan()).atan();
		let phik:f64 = self.omg + vk;

		let du_k:f64 = self.cus*(2.0*phik).sin() + self.cuc*(2.0*phik).cos();
		let dr_k:f64 = self.crs*(2.0*phik).sin() + self.crc*(2.0*phik).cos();
		let di_k:f64 = self.cis*(2.0*phik).sin() + self.cic*(2.0*phik).cos();

		let u_k:f64 = phik + du_k;
		let r_k:f64 = a*(1.0 - self.e*ek.cos()) + dr_k;
		let i_k:f64 = self.i0 + self.idot*tk + di_k;

		let x_kp:f64 = r_k * u_k.cos();
		let y_kp:f64 = r_k * u_k.sin();

		let omega_k:f64 = self.omg0 + (self.omgd - OMEGA_E)*tk - OMEGA_E*self.toes;

		let x_k:f64 = x_kp*omega_k.cos() - y_kp*omega_k.sin()*i_k.cos();
		let y_k:f64 = x_kp*omega_k.sin() + y_kp*omega_k.cos()*i_k.cos();
		let z_k:f64 = y_kp*i_k.sin();

		// Clock polynomial with the relativistic term and group delay
		let tc:f64 = time_diff_wrapped(t - self.toc);
		let dtr:f64 = -2.0*MU.sqrt()/(C*C) * self.e * a.sqrt() * ek.sin();
		let dt:f64 = self.f0 + self.f1*tc + self.f2*tc*tc - self.tgd + dtr;

		((x_k, y_k, z_k), dt)
	}

}

/// GLONASS broadcast state vector in ECEF (PZ-90), meters.
#[derive(Debug, Default, Serialize, Deserialize, Clone, Copy)]
pub struct GlonassEphemeris {
	pub slot:i32,
	pub frq:i32,
	pub svh:u8,
	pub week:i32,
	/// Reference epoch as GPS time of week [sec]
	pub toe_tow:f64,
	pub tb:i32,
	pub nt:i32,
	pub n4:i32,
	pub pos:[f64; 3],
	pub vel:[f64; 3],
	pub acc:[f64; 3],
	pub taun:f64,
	pub gamn:f64,
}

impl GlonassEphemeris {

	/// Quadratic extrapolation of the broadcast state vector.
	pub fn pos_and_clock(&self, t:f64) -> ((f64, f64, f64), f64) {
		let dt:f64 = time_diff_wrapped(t - self.toe_tow);
		let dt2:f64 = dt*dt;

		let x = self.pos[0] + self.vel[0]*dt + self.acc[0]*dt2/2.0;
		let y = self.pos[1] + self.vel[1]*dt + self.acc[1]*dt2/2.0;
		let z = self.pos[2] + self.vel[2]*dt + self.acc[2]*dt2/2.0;

		((x, y, z), -self.taun + self.gamn*dt)
	}

}

#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub enum Ephemeris {
	Kepler(KeplerEphemeris),
	Glonass(GlonassEphemeris),
}

const ZERO_TOL:f64 = 1.0e-15;

impl Ephemeris {

	pub fn week(&self) -> i32 {
		match self {
			Ephemeris::Kepler(eph)  => eph.week,
			Ephemeris::Glonass(eph) => eph.week,
		}
	}

	/// A set decoded consistently enough to feed satellite-position
	/// computation.  All-zero or partially-filled parameter sets fail.
	pub fn is_usable(&self) -> bool {
		match self {
			Ephemeris::Kepler(eph) => {
				eph.week > 0 && eph.iodc >= 0 && eph.toes >= 1.0
					&& (eph.iodc % 256) == (eph.iode % 256)
					&& eph.a.abs() > ZERO_TOL && eph.e.abs() > ZERO_TOL
					&& eph.m0.abs() > ZERO_TOL && eph.omg.abs() > ZERO_TOL
					&& eph.i0.abs() > ZERO_TOL && eph.omg0.abs() > ZERO_TOL
					&& eph.deln.abs() > ZERO_TOL && eph.idot.abs() > ZERO_TOL
					&& eph.omgd.abs() > ZERO_TOL
					&& eph.cuc.abs() > ZERO_TOL && eph.cus.abs() > ZERO_TOL
					&& eph.crc.abs() > ZERO_TOL && eph.crs.abs() > ZERO_TOL
					&& eph.cic.abs() > ZERO_TOL && eph.cis.abs() > ZERO_TOL
					&& eph.f0.abs() > ZERO_TOL
			},
			Ephemeris::Glonass(eph) => {
				eph.week > 0 && eph.toe_tow >= 1.0
					&& eph.pos.iter().all(|x| x.abs() > ZERO_TOL)
					&& eph.vel.iter().all(|x| x.abs() > ZERO_TOL)
			},
		}
	}

	/// ECEF position and clock correction at transmit time, or an error if
	/// the set is not usable or the propagation degenerates.
	pub fn pos_and_clock(&self, t:f64) -> Result<((f64, f64, f64), f64), DigSigProcErr> {
		if !self.is_usable() {
			return Err(DigSigProcErr::NoSolution("ephemeris not usable"));
		}
		let (pos, clk) = match self {
			Ephemeris::Kepler(eph)  => eph.pos_and_clock(t),
			Ephemeris::Glonass(eph) => eph.pos_and_clock(t),
		};
		if pos.0.is_nan() || pos.1.is_nan() || pos.2.is_nan() || clk.is_nan() {
			return Err(DigSigProcErr::NoSolution("satellite position is NaN"));
		}
		Ok((pos, clk))
	}

}

#[cfg(test)]
pub mod test_support {

	use super::*;

	/// A plausible mid-orbit parameter set for synthetic scenarios.
	pub fn synthetic_kepler(m0:f64) -> KeplerEphemeris {
		KeplerEphemeris {
			week: 2365, iodc: 57, iode: 57, sva: 0, svh: 0, fit: false,
			toes: 302400.0, toc: 302400.0,
			a: 26560.0e3, e: 0.01, m0, omg: 0.4, i0: 0.96, omg0: 1.2,
			deln: 4.8e-9, idot: 7.0e-10, omgd: -8.0e-9,
			cuc: 1.0e-6, cus: 1.0e-6, crc: 200.0, crs: 50.0,
			cic: 1.0e-7, cis: 1.0e-7,
			f0: 1.0e-4, f1: 1.0e-11, f2: 0.0, tgd: 5.0e-9,
		}
	}

}

#[cfg(test)]
mod tests {

	use super::*;
	use super::test_support::synthetic_kepler;

	#[test]
	fn kepler_orbit_radius_is_plausible() {
		let eph = synthetic_kepler(0.7);
		let ((x, y, z), _) = eph.pos_and_clock(302500.0);
		let r = (x*x + y*y + z*z).sqrt();
		// Semi-major axis 26560 km, eccentricity 0.01
		assert!(r > 26_200_000.0 && r < 26_900_000.0);
	}

	#[test]
	fn usable_requires_matching_issue_of_data() {
		let mut eph = synthetic_kepler(0.7);
		assert!(Ephemeris::Kepler(eph).is_usable());
		eph.iode = eph.iodc % 256 + 1;
		assert!(!Ephemeris::Kepler(eph).is_usable());
	}

	#[test]
	fn all_zero_set_is_rejected() {
		let eph = KeplerEphemeris::default();
		assert!(!Ephemeris::Kepler(eph).is_usable());
		assert!(Ephemeris::Kepler(eph).pos_and_clock(1000.0).is_err());

		let geph = GlonassEphemeris::default();
		assert!(!Ephemeris::Glonass(geph).is_usable());
	}

	#[test]
	fn half_week_rollover() {
		assert_eq!(time_diff_wrapped(302500.0), 302500.0 - WEEK_SEC);
		assert_eq!(time_diff_wrapped(-302500.0), WEEK_SEC - 302500.0);
		assert_eq!(time_diff_wrapped(1000.0), 1000.0);
	}

	#[test]
	fn glonass_extrapolation_matches_quadratic() {
		let eph = GlonassEphemeris {
			slot: 3, frq: -2, svh: 0, week: 2365,
			toe_tow: 100_000.0, tb: 37, nt: 500, n4: 8,
			pos: [1.0e7, 2.0e7, 5.0e6],
			vel: [100.0, -200.0, 300.0],
			acc: [1.0e-3, 2.0e-3, -1.0e-3],
			taun: 1.0e-5, gamn: 1.0e-12,
		};
		let ((x, _, _), clk) = eph.pos_and_clock(100_010.0);
		assert!((x - (1.0e7 + 100.0*10.0 + 1.0e-3*50.0)).abs() < 1.0e-6);
		assert!((clk - (-1.0e-5 + 1.0e-12*10.0)).abs() < 1.0e-18);
	}

}
