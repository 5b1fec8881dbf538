
use crate::DigSigProcErr;

use super::signal::SignalType;

/// G2 phase delays [chips] for GPS L1 C/A PRN 1-32
const G2_DELAY_GPS:[usize; 32] = [
	  5,   6,   7,   8,  17,  18, 139, 140, 141, 251,
	252, 254, 255, 256, 257, 258, 469, 470, 471, 472,
	473, 474, 509, 512, 513, 514, 515, 516, 859, 860,
	861, 862];

/// G2 phase delays [chips] for SBAS PRN 120-138
const G2_DELAY_SBAS:[usize; 19] = [
	145, 175,  52,  21, 237, 235, 886, 657, 634, 762,
	355, 1012, 176, 603, 130, 359, 595,  68, 386];

fn g2_delay(prn:usize) -> Result<usize, DigSigProcErr> {
	match prn {
		1..=32    => Ok(G2_DELAY_GPS[prn-1]),
		120..=138 => Ok(G2_DELAY_SBAS[prn-120]),
		_         => Err(DigSigProcErr::InvalidConfiguration("no C/A code assignment for this PRN")),
	}
}

/// 1023-chip L1 C/A Gold code as +/-1 levels (a one bit maps to -1)
pub fn ca_code(prn:usize) -> Result<Vec<i8>, DigSigProcErr> {
	let delay = g2_delay(prn)?;

	let mut g1:[u8; 1023] = [0; 1023];
	let mut g2:[u8; 1023] = [0; 1023];

	let mut reg1:[u8; 10] = [1; 10];
	let mut reg2:[u8; 10] = [1; 10];
	for i in 0..1023 {
		g1[i] = reg1[9];
		g2[i] = reg2[9];

		let fb1 = reg1[2] ^ reg1[9];
		let fb2 = reg2[1] ^ reg2[2] ^ reg2[5] ^ reg2[7] ^ reg2[8] ^ reg2[9];
		for j in (1..10).rev() {
			reg1[j] = reg1[j-1];
			reg2[j] = reg2[j-1];
		}
		reg1[0] = fb1;
		reg2[0] = fb2;
	}

	Ok((0..1023).map(|i| {
		let chip = g1[i] ^ g2[(i + 1023 - delay) % 1023];
		if chip == 1 { -1i8 } else { 1i8 }
	}).collect())
}

/// 511-chip GLONASS ranging code (9-stage m-sequence, output from stage 7),
/// shared by every satellite in the FDMA plan
pub fn glonass_code() -> Vec<i8> {
	let mut reg:[u8; 9] = [1; 9];
	(0..511).map(|_| {
		let out = reg[6];
		let fb = reg[4] ^ reg[8];
		for j in (1..9).rev() { reg[j] = reg[j-1]; }
		reg[0] = fb;
		if out == 1 { -1i8 } else { 1i8 }
	}).collect()
}

/// Local code chips for a channel.  Galileo E1B primary codes are memory
/// codes with no generating register, so they must be supplied by the
/// caller at channel creation.
pub fn local_code(signal:SignalType, prn:usize) -> Result<Vec<i8>, DigSigProcErr> {
	match signal {
		SignalType::GpsL1Ca | SignalType::SbasL1 => ca_code(prn),
		SignalType::GlonassG1                    => Ok(glonass_code()),
		SignalType::GalileoE1b                   => Err(DigSigProcErr::InvalidConfiguration("E1B memory code must be supplied externally")),
	}
}

/// One code period resampled at the receiver sample rate
pub fn sample_code(chips:&[i8], code_rate_hz:f64, fs:f64, n:usize) -> Vec<i8> {
	let ci:f64 = code_rate_hz / fs;
	let len:f64 = chips.len() as f64;
	let mut coff:f64 = 0.0;
	(0..n).map(|_| {
		if coff >= len { coff -= len; }
		let chip = chips[coff as usize];
		coff += ci;
		chip
	}).collect()
}
