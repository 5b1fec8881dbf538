
use crate::DigSigProcErr;
use crate::utils::bits::{getbitu, pack_levels};

use super::fec;

pub const MESSAGE_BITS:usize = 250;
pub const DATA_BITS:usize = 226;

/// SBAS messages carry no ephemeris; the assembly tracks the message
/// stream time and the learned bit polarity.
#[derive(Debug, Default)]
pub struct MessageAssembly {
	pub tow: f64,
	pub week: i32,
	pub last_msg_id: u8,
	/// Set when a positive preamble correlation failed its CRC, meaning
	/// the convolutional decoder resolved the opposite sense
	pub flagpol: bool,
}

impl MessageAssembly {

	pub fn new() -> Self { Self::default() }

	/// CRC-24Q over the first 226 message bits against the trailing 24.
	pub fn parity_ok(&self, decoded:&[i8], polarity:i8) -> bool {
		if decoded.len() < MESSAGE_BITS { return false; }
		let bits:Vec<bool> = decoded[..DATA_BITS].iter().map(|l| l * polarity < 0).collect();
		let crc = fec::crc24q(&bits);

		let check:Vec<i8> = decoded[DATA_BITS..MESSAGE_BITS].iter().map(|l| l * polarity).collect();
		let packed = pack_levels(&check, 3, false);
		crc == getbitu(&packed, 0, 24)
	}

	pub fn note_parity_failure(&mut self, polarity:i8) {
		if polarity == 1 { self.flagpol = true; }
	}

	/// Decodes one 250-bit message.  MT12 carries the time reference;
	/// every other type just advances the second count.
	pub fn decode(&mut self, decoded:&[i8], polarity:i8) -> Result<u8, DigSigProcErr> {
		if !self.parity_ok(decoded, polarity) {
			return Err(DigSigProcErr::InvalidTelemetryData("SBAS CRC mismatch"));
		}
		let levels:Vec<i8> = decoded[..MESSAGE_BITS].iter().map(|l| l * polarity).collect();
		let msg = pack_levels(&levels, 32, false);

		self.last_msg_id = getbitu(&msg, 8, 6) as u8;
		match self.last_msg_id {
			12 => {
				self.tow  = getbitu(&msg, 107, 20) as f64 + 1.0;
				self.week = getbitu(&msg, 127, 10) as i32 + 1024;
			},
			_ => { self.tow += 1.0; },
		}
		Ok(self.last_msg_id)
	}

}

#[cfg(test)]
pub mod test_support {

	use super::*;

	/// Builds a 250-level message with a valid CRC from 226 data levels.
	pub fn finish_message(data:&[i8]) -> Vec<i8> {
		assert_eq!(data.len(), DATA_BITS);
		let bits:Vec<bool> = data.iter().map(|l| *l < 0).collect();
		let crc = fec::crc24q(&bits);

		let mut ans = data.to_vec();
		for i in (0..24).rev() {
			ans.push(if (crc >> i) & 1 == 1 { -1 } else { 1 });
		}
		ans
	}

	/// 226 data levels for a given message type with the MT12 time fields.
	pub fn message_data(msg_id:u32, tow:u32, week10:u32) -> Vec<i8> {
		let mut bits:Vec<u32> = vec![0; DATA_BITS];
		for i in 0..6 { bits[8 + i] = (msg_id >> (5 - i)) & 1; }
		if msg_id == 12 {
			for i in 0..20 { bits[107 + i] = (tow >> (19 - i)) & 1; }
			for i in 0..10 { bits[127 + i] = (week10 >> (9 - i)) & 1; }
		}
		bits.into_iter().map(|b| if b == 1 { -1i8 } else { 1i8 }).collect()
	}

}
