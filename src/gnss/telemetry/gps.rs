
use std::f64::consts;

use crate::DigSigProcErr;
use crate::utils::bits::{getbitu, getbits, getbitu2, getbits2, pack_levels};

use crate::gnss::ephemeris::{Ephemeris, KeplerEphemeris};
use crate::gnss::signal::MIN_PLAUSIBLE_WEEK;

const P2_5:f64  = 0.03125;
const P2_19:f64 = 1.0 / 524288.0;
const P2_29:f64 = 1.0 / 536870912.0;
const P2_31:f64 = 1.0 / 2147483648.0;
const P2_33:f64 = 1.0 / 8589934592.0;
const P2_43:f64 = 1.0 / 8796093022208.0;
const P2_55:f64 = 1.0 / 36028797018963968.0;
const SC2RAD:f64 = consts::PI;

pub const FRAME_BITS:usize = 300;
pub const EXTRA_BITS:usize = 2;

/// Ten-year rollover disambiguation of the 10-bit broadcast week number.
pub fn adj_gps_week(week10:u32) -> i32 {
	let mut week = week10 as i32;
	while week < MIN_PLAUSIBLE_WEEK - 512 { week += 1024; }
	week
}

/// D29/D30 parity over one 30-bit word carried as +/-1 levels, preceded
/// by the last two parity levels of the previous word; data levels are
/// expected pre-complemented per D30.
fn parity_check_word(bits:&[i8]) -> bool {
	let mut pbits:[i32; 6] = [0; 6];
	let b = |i:usize| bits[i] as i32;

	pbits[0] = b(0)*b(2)*b(3)*b(4)*b(6)*b(7 )*b(11)*b(12)*b(13)*b(14)*b(15)*b(18)*b(19)*b(21)*b(24);
	pbits[1] = b(1)*b(3)*b(4)*b(5)*b(7)*b(8 )*b(12)*b(13)*b(14)*b(15)*b(16)*b(19)*b(20)*b(22)*b(25);
	pbits[2] = b(0)*b(2)*b(4)*b(5)*b(6)*b(8 )*b(9 )*b(13)*b(14)*b(15)*b(16)*b(17)*b(20)*b(21)*b(23);
	pbits[3] = b(1)*b(3)*b(5)*b(6)*b(7)*b(9 )*b(10)*b(14)*b(15)*b(16)*b(17)*b(18)*b(21)*b(22)*b(24);
	pbits[4] = b(1)*b(2)*b(4)*b(6)*b(7)*b(8 )*b(10)*b(11)*b(15)*b(16)*b(17)*b(18)*b(19)*b(22)*b(23)*b(25);
	pbits[5] = b(0)*b(4)*b(6)*b(7)*b(9)*b(10)*b(11)*b(12)*b(14)*b(16)*b(20)*b(23)*b(24)*b(25);

	(0..6).all(|i| pbits[i] == b(26+i))
}

/// Checks all ten words of a candidate subframe.  `levels` holds the two
/// trailing parity levels of the previous word followed by the 300-bit
/// frame, already multiplied by the resolved polarity.
pub fn parity_frame_ok(levels:&[i8]) -> bool {
	if levels.len() < EXTRA_BITS + FRAME_BITS { return false; }
	let mut bits:Vec<i8> = levels[..EXTRA_BITS + FRAME_BITS].to_vec();

	for w in 0..10 {
		// Complement the data bits when the previous D30 was set
		if bits[w*30 + 1] == -1 {
			for j in 2..26 { bits[w*30 + j] *= -1; }
		}
		if !parity_check_word(&bits[w*30 .. w*30 + 32]) { return false; }
	}
	true
}

/// Accumulates subframes 1-3 into a Keplerian ephemeris, gated on
/// matching issue-of-data counters.
#[derive(Debug, Default)]
pub struct SubframeAssembly {
	pub eph: KeplerEphemeris,
	pub tow_gpst: f64,
	pub week: i32,
	pub cnt: usize,
	pub cntth: usize,
	pub update: bool,
	have_sf1: bool,
	have_sf2: bool,
	have_sf3: bool,
	iode_sf2: i32,
}

impl SubframeAssembly {

	pub fn new(cntth:usize) -> Self {
		let mut ans = Self::default();
		ans.cntth = cntth;
		ans.eph.iodc = -1;
		ans
	}

	/// Decodes one 302-level candidate frame.  Returns the subframe id.
	pub fn decode(&mut self, levels:&[i8], polarity:i8) -> Result<u8, DigSigProcErr> {
		if levels.len() < EXTRA_BITS + FRAME_BITS {
			return Err(DigSigProcErr::InvalidTelemetryData("short GPS frame buffer"));
		}
		let mut bits:Vec<i8> = levels[..EXTRA_BITS + FRAME_BITS].iter().map(|l| l * polarity).collect();
		for w in 0..10 {
			if bits[w*30 + 1] == -1 {
				for j in 2..26 { bits[w*30 + j] *= -1; }
			}
		}
		let buff = pack_levels(&bits[EXTRA_BITS..], 38, false);

		let id = getbitu(&buff, 49, 3) as u8;
		match id {
			1 => self.decode_subframe1(&buff),
			2 => self.decode_subframe2(&buff),
			3 => self.decode_subframe3(&buff),
			4 | 5 => { self.tow_gpst = getbitu(&buff, 30, 17) as f64 * 6.0; },
			_ => return Err(DigSigProcErr::InvalidTelemetryData("GPS subframe id out of range")),
		}
		Ok(id)
	}

	fn decode_subframe1(&mut self, buff:&[u8]) {
		self.tow_gpst   = getbitu(buff, 30, 17) as f64 * 6.0;
		let week10      = getbitu(buff, 60, 10);
		self.eph.sva    = getbitu(buff, 72, 4) as u8;
		self.eph.svh    = getbitu(buff, 76, 6) as u8;
		self.eph.iodc   = getbitu2(buff, 82, 2, 210, 8) as i32;
		self.eph.tgd    = getbits(buff, 196, 8) as f64 * P2_31;
		self.eph.toc    = getbitu(buff, 218, 16) as f64 * 16.0;
		self.eph.f2     = getbits(buff, 240, 8)  as f64 * P2_55;
		self.eph.f1     = getbits(buff, 248, 16) as f64 * P2_43;
		self.eph.f0     = getbits(buff, 270, 22) as f64 * P2_31;

		self.eph.week = adj_gps_week(week10);
		self.week = self.eph.week;
		self.have_sf1 = true;
		self.cnt += 1;
	}

	fn decode_subframe2(&mut self, buff:&[u8]) {
		let old_iode = self.iode_sf2;

		self.tow_gpst   = getbitu(buff, 30, 17) as f64 * 6.0;
		self.iode_sf2   = getbitu(buff, 60, 8) as i32;
		self.eph.crs    = getbits(buff, 68, 16) as f64 * P2_5;
		self.eph.deln   = getbits(buff, 90, 16) as f64 * P2_43 * SC2RAD;
		self.eph.m0     = getbits2(buff, 106, 8, 120, 24) as f64 * P2_31 * SC2RAD;
		self.eph.cuc    = getbits(buff, 150, 16) as f64 * P2_29;
		self.eph.e      = getbitu2(buff, 166, 8, 180, 24) as f64 * P2_33;
		self.eph.cus    = getbits(buff, 210, 16) as f64 * P2_29;
		let sqrt_a      = getbitu2(buff, 226, 8, 240, 24) as f64 * P2_19;
		self.eph.toes   = getbitu(buff, 270, 16) as f64 * 16.0;
		self.eph.fit    = getbitu(buff, 286, 1) != 0;
		self.eph.a      = sqrt_a * sqrt_a;

		if old_iode != self.iode_sf2 { self.update = true; }
		self.have_sf2 = true;
		self.cnt += 1;
	}

	fn decode_subframe3(&mut self, buff:&[u8]) {
		let old_iode = self.eph.iode;

		self.tow_gpst   = getbitu(buff, 30, 17) as f64 * 6.0;
		self.eph.cic    = getbits(buff, 60, 16) as f64 * P2_29;
		self.eph.omg0   = getbits2(buff, 76, 8, 90, 24) as f64 * P2_31 * SC2RAD;
		self.eph.cis    = getbits(buff, 120, 16) as f64 * P2_29;
		self.eph.i0     = getbits2(buff, 136, 8, 150, 24) as f64 * P2_31 * SC2RAD;
		self.eph.crc    = getbits(buff, 180, 16) as f64 * P2_5;
		self.eph.omg    = getbits2(buff, 196, 8, 210, 24) as f64 * P2_31 * SC2RAD;
		self.eph.omgd   = getbits(buff, 240, 24) as f64 * P2_43 * SC2RAD;
		self.eph.iode   = getbitu(buff, 270, 8) as i32;
		self.eph.idot   = getbits(buff, 278, 14) as f64 * P2_43 * SC2RAD;

		if old_iode != self.eph.iode { self.update = true; }
		self.have_sf3 = true;
		self.cnt += 1;
	}

	/// The completed set, once subframes 1-3 agree on issue-of-data.
	pub fn ephemeris(&self) -> Option<Ephemeris> {
		if self.have_sf1 && self.have_sf2 && self.have_sf3
			&& self.cnt >= self.cntth
			&& (self.eph.iodc % 256) == self.iode_sf2
			&& self.iode_sf2 == self.eph.iode {
			Some(Ephemeris::Kepler(self.eph))
		} else {
			None
		}
	}

}

#[cfg(test)]
pub mod test_support {

	use super::*;

	/// Parity-encodes 24 data levels into a 30-bit word given the trailing
	/// parity levels of the previous word.
	pub fn encode_word(data:&[i8], last_d29:i8, last_d30:i8) -> Vec<i8> {
		assert_eq!(data.len(), 24);
		// Transmitted data bits are complemented by the previous D30
		let tx:Vec<i8> = data.iter().map(|d| d * last_d30).collect();
		let d = |i:usize| data[i] as i32;

		let p = [
			(last_d29 as i32)*d(0)*d(1)*d(2)*d(4)*d(5)*d(9)*d(10)*d(11)*d(12)*d(13)*d(16)*d(17)*d(19)*d(22),
			(last_d30 as i32)*d(1)*d(2)*d(3)*d(5)*d(6)*d(10)*d(11)*d(12)*d(13)*d(14)*d(17)*d(18)*d(20)*d(23),
			(last_d29 as i32)*d(0)*d(2)*d(3)*d(4)*d(6)*d(7)*d(11)*d(12)*d(13)*d(14)*d(15)*d(18)*d(19)*d(21),
			(last_d30 as i32)*d(1)*d(3)*d(4)*d(5)*d(7)*d(8)*d(12)*d(13)*d(14)*d(15)*d(16)*d(19)*d(20)*d(22),
			(last_d30 as i32)*d(0)*d(2)*d(4)*d(5)*d(6)*d(8)*d(9)*d(13)*d(14)*d(15)*d(16)*d(17)*d(20)*d(21)*d(23),
			(last_d29 as i32)*d(2)*d(4)*d(5)*d(7)*d(8)*d(9)*d(10)*d(12)*d(14)*d(18)*d(21)*d(22)*d(23),
		];

		let mut word = tx;
		for i in 0..6 { word.push(p[i] as i8); }
		word
	}

	/// Builds a full 302-level frame (two lead-in parity levels plus ten
	/// words) from 240 data levels.  The last two data bits of the tenth
	/// word are adjusted so the frame ends with both parity levels
	/// positive, which lets frames chain without a polarity seam.
	pub fn encode_frame(data:&[i8]) -> Vec<i8> {
		assert_eq!(data.len(), 240);
		let mut data:Vec<i8> = data.to_vec();
		let mut ans:Vec<i8> = vec![1, 1];
		let (mut d29, mut d30) = (1i8, 1i8);
		for w in 0..10 {
			if w == 9 {
				// Force D30 via d24, then D29 via d23 (whose equation does
				// not involve d24's counterpart)
				let word = encode_word(&data[w*24 .. (w+1)*24], d29, d30);
				if word[29] != 1 { data[w*24 + 23] *= -1; }
				let word = encode_word(&data[w*24 .. (w+1)*24], d29, d30);
				if word[28] != 1 { data[w*24 + 22] *= -1; }
			}
			let word = encode_word(&data[w*24 .. (w+1)*24], d29, d30);
			d29 = word[28];
			d30 = word[29];
			ans.extend_from_slice(&word);
		}
		ans
	}

}

#[cfg(test)]
mod tests {

	use super::*;
	use super::test_support::*;

	fn level(bit:u32) -> i8 { if bit == 1 { -1 } else { 1 } }

	/// 240 data levels carrying a given subframe id, TOW and a pattern
	fn frame_data(id:u32, tow_count:u32) -> Vec<i8> {
		let mut bits:Vec<u32> = vec![0; 240];
		// Word 2 (HOW): 17-bit TOW count then the 3-bit subframe id.
		// Data-bit positions within the parity-stripped stream: word w
		// occupies bits 24w..24w+23
		for i in 0..17 { bits[24 + i] = (tow_count >> (16 - i)) & 1; }
		for i in 0..3  { bits[24 + 19 + i] = (id >> (2 - i)) & 1; }
		// Fill the tail words with a fixed pattern so fields are nonzero
		for i in 48..240 { bits[i] = ((i*7) % 3 == 1) as u32; }
		bits.into_iter().map(level).collect()
	}

	#[test]
	fn parity_round_trip_law() {
		let frame = encode_frame(&frame_data(4, 1200));
		assert!(parity_frame_ok(&frame));

		// Any single flipped level must break the parity law
		let mut corrupted = frame.clone();
		corrupted[37] *= -1;
		assert!(!parity_frame_ok(&corrupted));
	}

	#[test]
	fn parity_holds_under_inverted_polarity() {
		let frame:Vec<i8> = encode_frame(&frame_data(5, 331)).iter().map(|l| -l).collect();
		let restored:Vec<i8> = frame.iter().map(|l| -l).collect();
		assert!(parity_frame_ok(&restored));
	}

	#[test]
	fn decode_reads_subframe_id_and_tow() {
		let frame = encode_frame(&frame_data(4, 1200));
		let mut asm = SubframeAssembly::new(3);
		let id = asm.decode(&frame, 1).unwrap();
		assert_eq!(id, 4);
		assert!((asm.tow_gpst - 1200.0*6.0).abs() < 1.0e-9);
	}

	#[test]
	fn ephemeris_requires_all_three_subframes() {
		let mut asm = SubframeAssembly::new(3);
		for id in [1u32, 2, 3].iter() {
			assert!(asm.ephemeris().is_none());
			let frame = encode_frame(&frame_data(*id, 100 + *id));
			asm.decode(&frame, 1).unwrap();
		}
		// The synthetic fill pattern does not guarantee matching IODC/IODE,
		// so completion is allowed but not required here; the gate itself
		// is what must hold
		if let Some(eph) = asm.ephemeris() {
			assert!((asm.eph.iodc % 256) == asm.eph.iode);
			assert!(eph.week() >= MIN_PLAUSIBLE_WEEK - 512);
		}
	}

	#[test]
	fn week_rollover_adjustment() {
		assert!(adj_gps_week(300) >= MIN_PLAUSIBLE_WEEK - 512);
		assert_eq!(adj_gps_week(300) % 1024, 300);
	}

}
