
use std::collections::HashMap;
use std::fs;
use std::process::exit;

use clap::{Arg, App};
use colored::*;

use sdr_gnss::DigSigProcErr;
use sdr_gnss::io::SampleFormat;
use sdr_gnss::receiver::{Receiver, ReceiverConfig};

/// E1B memory-code tables are loaded from a text file with one line per
/// satellite: the PRN followed by 1023 hex characters (4092 chips, a set
/// bit is a -1 chip).
fn parse_e1b_codes(path:&str) -> Result<HashMap<usize, Vec<i8>>, DigSigProcErr> {
	let text = fs::read_to_string(path).map_err(|_| DigSigProcErr::InvalidConfiguration("unable to read E1B code file"))?;

	let mut ans:HashMap<usize, Vec<i8>> = HashMap::new();
	for line in text.lines() {
		let line = line.trim();
		if line.is_empty() || line.starts_with('#') { continue; }

		let mut parts = line.split_whitespace();
		let prn:usize = parts.next()
			.and_then(|s| s.parse().ok())
			.ok_or(DigSigProcErr::InvalidConfiguration("bad PRN in E1B code file"))?;
		let hex = parts.next().ok_or(DigSigProcErr::InvalidConfiguration("missing chips in E1B code file"))?;
		if hex.len() != 1023 {
			return Err(DigSigProcErr::InvalidConfiguration("E1B code line must hold 1023 hex characters"));
		}

		let mut chips:Vec<i8> = Vec::with_capacity(4092);
		for c in hex.chars() {
			let nibble = c.to_digit(16).ok_or(DigSigProcErr::InvalidConfiguration("non-hex character in E1B code file"))?;
			for b in (0..4).rev() {
				chips.push(if (nibble >> b) & 1 == 1 { -1 } else { 1 });
			}
		}
		ans.insert(prn, chips);
	}
	Ok(ans)
}

fn main() {

	env_logger::init();

	let matches = App::new("SDR GNSS Receiver")
		.version("0.1.0")
		.author("John Stanford (johnwstanford@gmail.com)")
		.about("Takes IF samples from a capture file and produces position fixes")
		.arg(Arg::with_name("filename")
			.short("f").long("filename")
			.help("Input capture file")
			.required(true).takes_value(true))
		.arg(Arg::with_name("sample_rate_sps")
			.short("s").long("sample_rate_sps")
			.takes_value(true).required(true))
		.arg(Arg::with_name("format")
			.short("t").long("format")
			.takes_value(true)
			.possible_value("u8")
			.possible_value("u8iq")
			.possible_value("i16iq")
			.help("Sample format, default u8iq"))
		.arg(Arg::with_name("system")
			.long("system")
			.takes_value(true)
			.possible_value("gps")
			.possible_value("galileo")
			.possible_value("glonass")
			.help("Constellation to run, default gps"))
		.arg(Arg::with_name("e1b_codes")
			.long("e1b_codes")
			.takes_value(true)
			.help("E1B memory-code table, required for --system galileo"))
		.get_matches();

	let fname:&str = matches.value_of("filename").unwrap();
	let fs:f64 = match matches.value_of("sample_rate_sps").unwrap().parse() {
		Ok(fs) => fs,
		Err(_) => {
			eprintln!("{}", "Sample rate must be numeric".red());
			exit(1);
		},
	};
	let format = match SampleFormat::from_str(matches.value_of("format").unwrap_or("u8iq")) {
		Ok(f) => f,
		Err(e) => {
			eprintln!("{}", format!("{:?}", e).red());
			exit(1);
		},
	};

	let cfg = match matches.value_of("system").unwrap_or("gps") {
		"glonass" => ReceiverConfig::glonass(fs, format),
		"galileo" => {
			let codes_path = match matches.value_of("e1b_codes") {
				Some(p) => p,
				None => {
					eprintln!("{}", "--system galileo requires --e1b_codes".red());
					exit(1);
				},
			};
			match parse_e1b_codes(codes_path) {
				Ok(codes) => ReceiverConfig::galileo(fs, format, codes),
				Err(e) => {
					eprintln!("{}", format!("E1B code table: {:?}", e).red());
					exit(1);
				},
			}
		},
		_ => ReceiverConfig::gps(fs, format),
	};

	eprintln!("Decoding {} at {} [samples/sec], {} channels", fname, fs, cfg.channels.len());

	let rx = match Receiver::new(cfg) {
		Ok(rx) => rx,
		Err(e) => {
			eprintln!("{}", format!("Receiver failed to start: {:?}", e).red().bold());
			exit(1);
		},
	};

	match rx.run_from_file(fname) {
		Ok(()) => {
			let report = rx.report();
			if report.fix.sv_count > 0 {
				eprintln!("{}", format!("Final fix: {:.5} [deg] lat, {:.5} [deg] lon, {:.1} [m]",
					report.fix.lat_deg, report.fix.lon_deg, report.fix.height_m).green().bold());
			} else {
				eprintln!("{}", "No fix produced".yellow());
			}
			println!("{}", serde_json::to_string_pretty(&report).unwrap());
		},
		Err(e) => {
			eprintln!("{}", format!("Receiver stopped with error: {:?}", e).red().bold());
			exit(1);
		},
	}

}
