
use crate::DigSigProcErr;
use crate::utils::bits::{getbitu, getbitg, pack_levels};

use crate::gnss::ephemeris::{Ephemeris, GlonassEphemeris};

const P2_11:f64 = 1.0 / 2048.0;
const P2_20:f64 = 1.0 / 1048576.0;
const P2_30:f64 = 1.0 / 1073741824.0;
const P2_40:f64 = 1.0 / 1099511627776.0;

pub const STRING_SYMBOLS:usize = 200;
pub const DATA_SYMBOLS:usize = 170;
pub const STRING_BITS:usize = 85;
const CHECK_BITS:usize = 8;
const DATA_BITS:usize = STRING_BITS - CHECK_BITS;

/// GPS-UTC leap seconds assumed for GLONASS day conversion.
const LEAP_SECONDS:f64 = 18.0;

/// Days from the GPS epoch (1980-01-06) to the GLONASS four-year-cycle
/// origin (1996-01-01).
const GLO_CYCLE_ORIGIN_DAYS:i64 = 5839;

const MOSCOW_OFFSET_SEC:f64 = 10800.0;

/// Code positions for the shortened-Hamming check: each of the 77 data
/// bits gets the next index that is not a power of two, so check bit i
/// covers the data bits whose index has bit i set.
fn hamming_positions() -> Vec<u32> {
	let mut ans:Vec<u32> = Vec::with_capacity(DATA_BITS);
	let mut k:u32 = 3;
	while ans.len() < DATA_BITS {
		if !k.is_power_of_two() { ans.push(k); }
		k += 1;
	}
	ans
}

/// Check bits for 77 data bits: seven Hamming sums plus overall parity.
pub fn hamming_encode(data:&[bool]) -> [bool; CHECK_BITS] {
	let positions = hamming_positions();
	let mut ans = [false; CHECK_BITS];
	for i in 0..7 {
		let mut c = false;
		for (bit, pos) in data.iter().zip(positions.iter()) {
			if (pos >> i) & 1 == 1 { c ^= *bit; }
		}
		ans[i] = c;
	}
	ans[7] = data.iter().fold(false, |a, b| a ^ b) ^ ans[..7].iter().fold(false, |a, b| a ^ b);
	ans
}

pub fn hamming_check(bits:&[bool]) -> bool {
	if bits.len() != STRING_BITS { return false; }
	let expected = hamming_encode(&bits[..DATA_BITS]);
	bits[DATA_BITS..].iter().zip(expected.iter()).all(|(a, b)| a == b)
}

/// Collects strings 1-5 of one superframe into a broadcast state vector.
/// Completeness requires consecutive strings with an unchanged tb.
#[derive(Debug, Default)]
pub struct StringAssembly {
	pub eph: GlonassEphemeris,
	pub tow_gpst: f64,
	pub week: i32,
	pub cnt: usize,
	pub cntth: usize,
	last_string: u8,
	consecutive: usize,
	have: [bool; 5],
	tk_sec: f64,
	complete: bool,
}

impl StringAssembly {

	pub fn new(slot:i32, cntth:usize) -> Self {
		let mut ans = Self::default();
		ans.cntth = cntth;
		ans.eph.slot = slot;
		ans.eph.frq = slot - 8;
		ans
	}

	/// Removes the meander code and the relative encoding from the 170
	/// data symbols of one string.
	fn data_bits(frame:&[i8], polarity:i8) -> Result<Vec<bool>, DigSigProcErr> {
		if frame.len() < DATA_SYMBOLS {
			return Err(DigSigProcErr::InvalidTelemetryData("short GLONASS string"));
		}
		let mut bits:Vec<bool> = Vec::with_capacity(STRING_BITS);
		let mut prev = false;
		for i in 0..STRING_BITS {
			let raw = frame[2*i] * polarity < 0;
			bits.push(raw ^ prev);
			prev = raw;
		}
		Ok(bits)
	}

	/// Decodes one string from the frame buffer (time mark at the end).
	/// Returns the string number.
	pub fn decode(&mut self, frame:&[i8], polarity:i8) -> Result<u8, DigSigProcErr> {
		let bits = Self::data_bits(frame, polarity)?;
		if bits[0] {
			return Err(DigSigProcErr::InvalidTelemetryData("GLONASS idle bit set"));
		}
		if !hamming_check(&bits) {
			return Err(DigSigProcErr::InvalidTelemetryData("GLONASS Hamming check failed"));
		}

		let buff = pack_levels(&bits.iter().map(|b| if *b { -1i8 } else { 1 }).collect::<Vec<i8>>(), 11, false);
		let m = getbitu(&buff, 1, 4) as u8;

		if m >= 1 && m <= 5 {
			if m as i32 == (self.last_string as i32) + 1 { self.consecutive += 1; }
			else { self.consecutive = 1; self.have = [false; 5]; }
			self.last_string = m;
			self.have[(m-1) as usize] = true;
		}

		match m {
			1 => {
				let tk_h = getbitu(&buff, 9, 5) as f64;
				let tk_m = getbitu(&buff, 14, 6) as f64;
				let tk_s = getbitu(&buff, 20, 1) as f64 * 30.0;
				self.tk_sec = tk_h*3600.0 + tk_m*60.0 + tk_s;
				self.eph.vel[0] = getbitg(&buff, 21, 24) as f64 * P2_20 * 1.0e3;
				self.eph.acc[0] = getbitg(&buff, 45, 5)  as f64 * P2_30 * 1.0e3;
				self.eph.pos[0] = getbitg(&buff, 50, 27) as f64 * P2_11 * 1.0e3;
			},
			2 => {
				self.eph.svh = (getbitu(&buff, 5, 3) >> 2) as u8;
				let old_tb = self.eph.tb;
				self.eph.tb = getbitu(&buff, 9, 7) as i32;
				if old_tb != 0 && old_tb != self.eph.tb {
					// New ephemeris interval: start the set over
					self.have = [false; 5];
					self.have[1] = true;
					self.complete = false;
				}
				self.eph.vel[1] = getbitg(&buff, 21, 24) as f64 * P2_20 * 1.0e3;
				self.eph.acc[1] = getbitg(&buff, 45, 5)  as f64 * P2_30 * 1.0e3;
				self.eph.pos[1] = getbitg(&buff, 50, 27) as f64 * P2_11 * 1.0e3;
			},
			3 => {
				self.eph.gamn = getbitg(&buff, 6, 11) as f64 * P2_40;
				self.eph.vel[2] = getbitg(&buff, 21, 24) as f64 * P2_20 * 1.0e3;
				self.eph.acc[2] = getbitg(&buff, 45, 5)  as f64 * P2_30 * 1.0e3;
				self.eph.pos[2] = getbitg(&buff, 50, 27) as f64 * P2_11 * 1.0e3;
			},
			4 => {
				self.eph.taun = getbitg(&buff, 5, 22) as f64 * P2_30;
				self.eph.nt = getbitu(&buff, 59, 11) as i32;
			},
			5 => {
				self.eph.n4 = getbitu(&buff, 49, 5) as i32;
			},
			_ => return Err(DigSigProcErr::InvalidTelemetryData("GLONASS string number out of range")),
		}
		self.cnt += 1;

		if self.have.iter().all(|x| *x) && self.consecutive >= self.cntth && self.eph.tb != 0 {
			self.finish_set();
		}
		if self.week != 0 && self.tk_sec > 0.0 {
			// Strings sit two seconds apart within the frame, so the frame
			// time from string 1 dates every later string as well
			let (_, tow) = glo_to_gps_time(self.eph.n4, self.eph.nt, self.tk_sec + 2.0*((m as f64) - 1.0));
			self.tow_gpst = tow;
		}
		Ok(m)
	}

	fn finish_set(&mut self) {
		let toe_tod = (self.eph.tb as f64) * 900.0;
		let (week, tow) = glo_to_gps_time(self.eph.n4, self.eph.nt, toe_tod);
		self.eph.week = week;
		self.eph.toe_tow = tow;
		self.week = week;
		self.complete = true;
	}

	pub fn ephemeris(&self) -> Option<Ephemeris> {
		if self.complete { Some(Ephemeris::Glonass(self.eph)) } else { None }
	}

}

/// GLONASS calendar (four-year cycle N4, day NT, Moscow time of day) to
/// GPS week and time of week.
pub fn glo_to_gps_time(n4:i32, nt:i32, tod_moscow_sec:f64) -> (i32, f64) {
	let days:i64 = GLO_CYCLE_ORIGIN_DAYS + ((n4 as i64)-1)*1461 + ((nt as i64)-1);
	let gps_sec:f64 = (days as f64)*86400.0 + tod_moscow_sec - MOSCOW_OFFSET_SEC + LEAP_SECONDS;

	let week = (gps_sec / 604800.0).floor() as i32;
	let tow = gps_sec - (week as f64)*604800.0;
	(week, tow)
}


#[cfg(test)]
mod tests {

	use super::*;
	use super::test_support::*;

	#[test]
	fn hamming_round_trip_and_error_detection() {
		let data:Vec<bool> = (0..77).map(|i| (i*3) % 5 == 1).collect();
		let check = hamming_encode(&data);
		let mut string:Vec<bool> = data.clone();
		string.extend_from_slice(&check);
		assert!(hamming_check(&string));

		for flip in [0usize, 13, 40, 76, 80].iter() {
			let mut corrupted = string.clone();
			corrupted[*flip] = !corrupted[*flip];
			assert!(!hamming_check(&corrupted), "flip at {} went undetected", flip);
		}
	}

	#[test]
	fn string_round_trip() {
		let string = make_string(1, 0, 0, 0, 1_000_000, -50_000);
		let symbols = encode_string(&string);
		assert_eq!(symbols.len(), STRING_SYMBOLS);

		let mut asm = StringAssembly::new(5, 5);
		let m = asm.decode(&symbols, 1).unwrap();
		assert_eq!(m, 1);
		assert!((asm.eph.pos[0] - 1_000_000.0*P2_11*1.0e3).abs() < 1.0e-6);
		assert!((asm.eph.vel[0] + 50_000.0*P2_20*1.0e3).abs() < 1.0e-9);
	}

	#[test]
	fn ephemeris_needs_five_consecutive_strings() {
		let mut asm = StringAssembly::new(3, 5);
		for m in 1..=5u32 {
			assert!(asm.ephemeris().is_none());
			let symbols = encode_string(&make_string(m, 40, 800, 7, 2_000_000, 10_000));
			asm.decode(&symbols, 1).unwrap();
		}
		let eph = asm.ephemeris().expect("set should be complete");
		assert!(eph.week() > 0);
		match eph {
			Ephemeris::Glonass(g) => assert_eq!(g.tb, 40),
			_ => panic!("wrong ephemeris flavor"),
		}
	}

	#[test]
	fn out_of_order_strings_restart_the_set() {
		let mut asm = StringAssembly::new(3, 5);
		for m in [1u32, 2, 4, 1, 2].iter() {
			let symbols = encode_string(&make_string(*m, 40, 800, 7, 2_000_000, 10_000));
			asm.decode(&symbols, 1).unwrap();
		}
		assert!(asm.ephemeris().is_none());
	}

	#[test]
	fn glonass_day_conversion_is_monotonic() {
		let (w1, t1) = glo_to_gps_time(7, 100, 43_200.0);
		let (w2, t2) = glo_to_gps_time(7, 101, 43_200.0);
		let total1 = (w1 as f64)*604800.0 + t1;
		let total2 = (w2 as f64)*604800.0 + t2;
		assert!((total2 - total1 - 86400.0).abs() < 1.0e-6);
		assert!(w1 > 2000);
	}

}
