
use std::io::Read;
use std::sync::Mutex;

use byteorder::{LittleEndian, ReadBytesExt};
use rustfft::num_complex::Complex;
use serde::{Serialize, Deserialize};

use crate::DigSigProcErr;

pub const READ_BLOCK_SIZE:usize = 16384;

/// Number of samples the shared ring retains.  Channels that fall further
/// behind the feed than this lose their window and have to reacquire.
pub const RING_CAPACITY:usize = 4_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
	U8Real,
	U8Iq,
	I16Iq,
}

impl SampleFormat {

	pub fn from_str(s:&str) -> Result<Self, DigSigProcErr> {
		match s {
			"u8"    => Ok(SampleFormat::U8Real),
			"u8iq"  => Ok(SampleFormat::U8Iq),
			"i16iq" => Ok(SampleFormat::I16Iq),
			_       => Err(DigSigProcErr::InvalidConfiguration("unrecognized sample format")),
		}
	}

	pub fn components(&self) -> usize {
		match self {
			SampleFormat::U8Real => 1,
			SampleFormat::U8Iq | SampleFormat::I16Iq => 2,
		}
	}

}

/// Fixed-capacity ring of complex samples addressed by absolute sample
/// index.  Slot mapping is explicit: sample i lives at i % capacity and is
/// valid while count - capacity <= i < count.
pub struct SampleRing {
	buf: Vec<Complex<f64>>,
	count: u64,
}

impl SampleRing {

	pub fn with_capacity(capacity:usize) -> Self {
		Self { buf: vec![Complex{re: 0.0, im: 0.0}; capacity], count: 0 }
	}

	pub fn count(&self) -> u64 { self.count }

	pub fn push_block(&mut self, block:&[Complex<f64>]) {
		let cap = self.buf.len() as u64;
		for x in block {
			self.buf[(self.count % cap) as usize] = *x;
			self.count += 1;
		}
	}

	/// Copies n samples starting at absolute index start, or None if the
	/// window is not fully buffered yet or has already been overwritten.
	pub fn window(&self, start:u64, n:usize) -> Option<Vec<Complex<f64>>> {
		let cap = self.buf.len() as u64;
		let end = start + n as u64;
		if end > self.count { return None; }
		if self.count > cap && start < self.count - cap { return None; }
		Some((start..end).map(|i| self.buf[(i % cap) as usize]).collect())
	}

}

/// The ring plus its lock.  Critical sections are window copies only; all
/// signal processing happens on the copies.
pub struct SharedSampleBuffer(Mutex<SampleRing>);

impl SharedSampleBuffer {

	pub fn new(capacity:usize) -> Self { Self(Mutex::new(SampleRing::with_capacity(capacity))) }

	pub fn count(&self) -> u64 { self.0.lock().unwrap().count() }

	pub fn push_block(&self, block:&[Complex<f64>]) { self.0.lock().unwrap().push_block(block); }

	pub fn window(&self, start:u64, n:usize) -> Option<Vec<Complex<f64>>> { self.0.lock().unwrap().window(start, n) }

}

/// Reads de-biased complex samples out of an IF capture stream in blocks.
pub struct FileSource<S: Read> {
	src: S,
	format: SampleFormat,
}

impl<S: Read> FileSource<S> {

	pub fn new(src:S, format:SampleFormat) -> Self { Self { src, format } }

	/// Reads up to READ_BLOCK_SIZE samples; an empty vector means the
	/// stream is exhausted.
	pub fn next_block(&mut self) -> Result<Vec<Complex<f64>>, DigSigProcErr> {
		let mut ans:Vec<Complex<f64>> = Vec::with_capacity(READ_BLOCK_SIZE);
		match self.format {
			SampleFormat::U8Real => {
				let mut raw = vec![0u8; READ_BLOCK_SIZE];
				let n = self.src.read(&mut raw).map_err(|_| DigSigProcErr::Other("read failure on sample stream"))?;
				for k in 0..n {
					ans.push(Complex{ re: (raw[k] as i16 - 128) as f64, im: 0.0 });
				}
			},
			SampleFormat::U8Iq => {
				let mut raw = vec![0u8; READ_BLOCK_SIZE*2];
				let n = self.src.read(&mut raw).map_err(|_| DigSigProcErr::Other("read failure on sample stream"))?;
				for k in 0..(n/2) {
					ans.push(Complex{ re: (raw[2*k] as i16 - 128) as f64, im: (raw[2*k+1] as i16 - 128) as f64 });
				}
			},
			SampleFormat::I16Iq => {
				for _ in 0..READ_BLOCK_SIZE {
					let re = match self.src.read_i16::<LittleEndian>() { Ok(x) => x, Err(_) => break };
					let im = match self.src.read_i16::<LittleEndian>() { Ok(x) => x, Err(_) => break };
					ans.push(Complex{ re: re as f64, im: im as f64 });
				}
			},
		}
		Ok(ans)
	}

}
