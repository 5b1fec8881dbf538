
use std::f64::consts;

use crate::DigSigProcErr;

use crate::gnss::ephemeris::{Ephemeris, KeplerEphemeris};

use super::fec;

const P2_19:f64 = 1.0 / 524288.0;
const P2_29:f64 = 1.0 / 536870912.0;
const P2_31:f64 = 1.0 / 2147483648.0;
const P2_33:f64 = 1.0 / 8589934592.0;
const P2_34:f64 = 1.0 / 17179869184.0;
const P2_43:f64 = 1.0 / 8796093022208.0;
const P2_46:f64 = 1.0 / 70368744177664.0;
const P2_59:f64 = 1.0 / 576460752303423488.0;
const P2_5:f64  = 0.03125;
const P2_32:f64 = 1.0 / 4294967296.0;
const SC2RAD:f64 = consts::PI;

pub const PAGE_SYMBOLS:usize = 250;
pub const PREAMBLE_SYMBOLS:usize = 10;
pub const CODED_SYMBOLS:usize = 240;
pub const HALF_PAGE_BITS:usize = 120;

/// GST week zero aligns with GPS week 1024.
const GST_WEEK_OFFSET:i32 = 1024;

/// Undoes the 8-row by 30-column block interleaver of one coded half page.
pub fn deinterleave(symbols:&[bool]) -> Vec<bool> {
	(0..CODED_SYMBOLS).map(|i| symbols[(i % 8)*30 + i/8]).collect()
}

fn field_u(bits:&[bool], pos:usize, len:usize) -> u32 {
	let mut ans:u32 = 0;
	for i in pos..(pos+len) {
		ans = (ans << 1) | (bits[i] as u32);
	}
	ans
}

fn field_s(bits:&[bool], pos:usize, len:usize) -> i32 {
	let u = field_u(bits, pos, len);
	if len < 32 && (u & (1 << (len-1))) != 0 {
		(u | (0xFFFFFFFFu32 << len)) as i32
	} else {
		u as i32
	}
}

/// I/NAV word assembly: nominal pages arrive as an even/odd half-page
/// pair; word types 1-4 build the ephemeris under a common IODnav, word
/// type 5 supplies GST time and the broadcast group delay.
#[derive(Debug, Default)]
pub struct InavAssembly {
	pub eph: KeplerEphemeris,
	pub tow_gpst: f64,
	pub week: i32,
	pub cnt: usize,
	pub cntth: usize,
	iod_nav: [i32; 4],
	have_word: [bool; 4],
	have_time: bool,
}

impl InavAssembly {

	pub fn new(cntth:usize) -> Self {
		let mut ans = Self::default();
		ans.cntth = cntth;
		ans.iod_nav = [-1; 4];
		ans
	}

	/// FEC-decodes one half page (preamble stripped by the caller).
	fn decode_half(&self, symbols:&[i8], polarity:i8) -> Result<Vec<bool>, DigSigProcErr> {
		if symbols.len() < CODED_SYMBOLS {
			return Err(DigSigProcErr::InvalidTelemetryData("short E1B half page"));
		}
		let hard:Vec<bool> = symbols[..CODED_SYMBOLS].iter().map(|l| l * polarity < 0).collect();
		let bits = fec::viterbi_decode(&deinterleave(&hard), true);
		Ok(bits)
	}

	/// Decodes one full 500-symbol page pair from the frame buffer and
	/// returns the word type.
	pub fn decode(&mut self, frame:&[i8], polarity:i8) -> Result<u8, DigSigProcErr> {
		if frame.len() < 2*PAGE_SYMBOLS {
			return Err(DigSigProcErr::InvalidTelemetryData("short E1B page pair"));
		}
		let even = self.decode_half(&frame[PREAMBLE_SYMBOLS..PAGE_SYMBOLS], polarity)?;
		let odd  = self.decode_half(&frame[PAGE_SYMBOLS+PREAMBLE_SYMBOLS..2*PAGE_SYMBOLS], polarity)?;

		if even[0] || !odd[0] {
			return Err(DigSigProcErr::InvalidTelemetryData("E1B even/odd page order"));
		}

		// CRC-24Q over both half pages up to the check field
		let mut covered:Vec<bool> = even[..114].to_vec();
		covered.extend_from_slice(&odd[..82]);
		let crc = field_u(&odd, 82, 24);
		if fec::crc24q(&covered) != crc {
			return Err(DigSigProcErr::InvalidTelemetryData("E1B CRC mismatch"));
		}

		// 128-bit word: 112 data bits from the even part, 16 from the odd
		let mut word:Vec<bool> = even[2..114].to_vec();
		word.extend_from_slice(&odd[2..18]);

		let word_type = field_u(&word, 0, 6) as u8;
		match word_type {
			1 => {
				self.note_iod(0, field_u(&word, 6, 10) as i32);
				self.eph.toes = field_u(&word, 16, 14) as f64 * 60.0;
				self.eph.m0   = field_s(&word, 30, 32) as f64 * P2_31 * SC2RAD;
				self.eph.e    = field_u(&word, 62, 32) as f64 * P2_33;
				let sqrt_a    = field_u(&word, 94, 32) as f64 * P2_19;
				self.eph.a = sqrt_a * sqrt_a;
			},
			2 => {
				self.note_iod(1, field_u(&word, 6, 10) as i32);
				self.eph.omg0 = field_s(&word, 16, 32) as f64 * P2_31 * SC2RAD;
				self.eph.i0   = field_s(&word, 48, 32) as f64 * P2_31 * SC2RAD;
				self.eph.omg  = field_s(&word, 80, 32) as f64 * P2_31 * SC2RAD;
				self.eph.idot = field_s(&word, 112, 14) as f64 * P2_43 * SC2RAD;
			},
			3 => {
				self.note_iod(2, field_u(&word, 6, 10) as i32);
				self.eph.omgd = field_s(&word, 16, 24) as f64 * P2_43 * SC2RAD;
				self.eph.deln = field_s(&word, 40, 16) as f64 * P2_43 * SC2RAD;
				self.eph.cuc  = field_s(&word, 56, 16) as f64 * P2_29;
				self.eph.cus  = field_s(&word, 72, 16) as f64 * P2_29;
				self.eph.crc  = field_s(&word, 88, 16) as f64 * P2_5;
				self.eph.crs  = field_s(&word, 104, 16) as f64 * P2_5;
				self.eph.sva  = field_u(&word, 120, 8) as u8;
			},
			4 => {
				self.note_iod(3, field_u(&word, 6, 10) as i32);
				self.eph.cic  = field_s(&word, 22, 16) as f64 * P2_29;
				self.eph.cis  = field_s(&word, 38, 16) as f64 * P2_29;
				self.eph.toc  = field_u(&word, 54, 14) as f64 * 60.0;
				self.eph.f0   = field_s(&word, 68, 31) as f64 * P2_34;
				self.eph.f1   = field_s(&word, 99, 21) as f64 * P2_46;
				self.eph.f2   = field_s(&word, 120, 6) as f64 * P2_59;
			},
			5 => {
				self.eph.tgd  = field_s(&word, 57, 10) as f64 * P2_32;
				self.eph.svh  = field_u(&word, 67, 6) as u8;
				let wn  = field_u(&word, 73, 12) as i32;
				let tow = field_u(&word, 85, 20) as f64;
				self.week = wn + GST_WEEK_OFFSET;
				self.eph.week = self.week;
				self.tow_gpst = tow;
				self.have_time = true;
			},
			_ => { /* Reserved and almanac word types carry nothing we keep */ },
		}
		self.cnt += 1;
		Ok(word_type)
	}

	fn note_iod(&mut self, slot:usize, iod:i32) {
		// A changed IODnav invalidates the words gathered under the old one
		if self.iod_nav.iter().any(|x| *x >= 0 && *x != iod) {
			self.have_word = [false; 4];
			self.iod_nav = [-1; 4];
		}
		self.iod_nav[slot] = iod;
		self.have_word[slot] = true;
	}

	pub fn ephemeris(&self) -> Option<Ephemeris> {
		if self.have_word.iter().all(|x| *x) && self.have_time && self.cnt >= self.cntth {
			let mut eph = self.eph;
			eph.iodc = self.iod_nav[0];
			eph.iode = self.iod_nav[0] % 256;
			Some(Ephemeris::Kepler(eph))
		} else {
			None
		}
	}

}

#[cfg(test)]
pub mod test_support {

	use super::*;

	/// Re-applies the block interleaver (the inverse of deinterleave).
	pub fn interleave(symbols:&[bool]) -> Vec<bool> {
		let mut ans = vec![false; CODED_SYMBOLS];
		for i in 0..CODED_SYMBOLS {
			ans[(i % 8)*30 + i/8] = symbols[i];
		}
		ans
	}

	fn set_field(bits:&mut [bool], pos:usize, len:usize, val:u32) {
		for i in 0..len {
			bits[pos + i] = (val >> (len - 1 - i)) & 1 == 1;
		}
	}

	/// Encodes a 128-bit word into a 500-level page pair with preambles.
	pub fn encode_page_pair(word:&[bool]) -> Vec<i8> {
		assert_eq!(word.len(), 128);

		let mut even = vec![false; 114];
		even[0] = false;	// even half
		even[1] = false;	// nominal page
		for i in 0..112 { even[2+i] = word[i]; }

		let mut odd = vec![false; 82];
		odd[0] = true;
		for i in 0..16 { odd[2+i] = word[112+i]; }

		let mut covered = even.clone();
		covered.extend_from_slice(&odd);
		let crc = fec::crc24q(&covered);

		let mut odd_full = odd;
		for i in (0..24).rev() { odd_full.push((crc >> i) & 1 == 1); }
		odd_full.extend_from_slice(&[false; 8]);	// reserved + ssp

		let mut ans:Vec<i8> = vec![];
		for half in [even, odd_full].iter() {
			let mut bits = half.clone();
			bits.resize(114, false);
			bits.extend_from_slice(&[false; 6]);	// FEC tail
			let symbols = interleave(&fec::conv_encode(&bits, true));

			// Preamble then the interleaved symbols as +/-1 levels
			for p in crate::gnss::signal::SignalType::GalileoE1b.descriptor().preamble {
				ans.push(*p);
			}
			for s in symbols {
				ans.push(if s { -1 } else { 1 });
			}
		}
		ans
	}

	/// A word of the given type with IODnav and a few recognizable fields.
	pub fn make_word(word_type:u32, iod:u32) -> Vec<bool> {
		let mut bits = vec![false; 128];
		set_field(&mut bits, 0, 6, word_type);
		match word_type {
			1 => {
				set_field(&mut bits, 6, 10, iod);
				set_field(&mut bits, 16, 14, 5040);		// toe = 302400 s
				set_field(&mut bits, 30, 32, 0x2000_0000);
				set_field(&mut bits, 62, 32, 42_950);
				set_field(&mut bits, 94, 32, 0xA1C4_0000);
			},
			2 | 3 | 4 => {
				set_field(&mut bits, 6, 10, iod);
				set_field(&mut bits, 30, 20, 777);
			},
			5 => {
				set_field(&mut bits, 73, 12, 1341);		// GST week
				set_field(&mut bits, 85, 20, 302_455);
			},
			_ => {},
		}
		bits
	}

}

#[cfg(test)]
mod tests {

	use super::*;
	use super::test_support::*;

	#[test]
	fn interleaver_round_trip() {
		let symbols:Vec<bool> = (0..CODED_SYMBOLS).map(|i| (i*13) % 7 < 3).collect();
		let rt:Vec<bool> = deinterleave(&interleave(&symbols));
		assert_eq!(rt, symbols);
	}

	#[test]
	fn page_pair_round_trip() {
		let word = make_word(1, 57);
		let page = encode_page_pair(&word);
		assert_eq!(page.len(), 2*PAGE_SYMBOLS);

		let mut asm = InavAssembly::new(5);
		let wt = asm.decode(&page, 1).unwrap();
		assert_eq!(wt, 1);
		assert!((asm.eph.toes - 302400.0).abs() < 1.0e-9);
	}

	#[test]
	fn corrupted_page_is_rejected() {
		// A burst well beyond the correction capability of the FEC
		let mut page = encode_page_pair(&make_word(2, 57));
		for i in 20..80 { page[i] *= -1; }
		let mut asm = InavAssembly::new(5);
		assert!(asm.decode(&page, 1).is_err());
	}

	#[test]
	fn ephemeris_needs_words_one_through_five() {
		let mut asm = InavAssembly::new(5);
		for wt in 1..=4u32 {
			assert!(asm.ephemeris().is_none());
			asm.decode(&encode_page_pair(&make_word(wt, 57)), 1).unwrap();
		}
		assert!(asm.ephemeris().is_none());
		asm.decode(&encode_page_pair(&make_word(5, 57)), 1).unwrap();
		assert!(asm.ephemeris().is_some());
		let eph = asm.ephemeris().unwrap();
		assert_eq!(eph.week(), 1341 + 1024);
	}

	#[test]
	fn changed_iodnav_restarts_collection() {
		let mut asm = InavAssembly::new(0);
		for wt in 1..=4u32 {
			asm.decode(&encode_page_pair(&make_word(wt, 57)), 1).unwrap();
		}
		asm.decode(&encode_page_pair(&make_word(5, 57)), 1).unwrap();
		assert!(asm.ephemeris().is_some());

		asm.decode(&encode_page_pair(&make_word(2, 58)), 1).unwrap();
		assert!(asm.ephemeris().is_none());
	}

}
