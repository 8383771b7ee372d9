//! Single-threaded provider of the Echo service.
//!
//! Legal queries and corresponding responses (EOS-terminated strings):
//!   `ECHO:text` -> `1text`
//!   `SINK:text` -> `1`
//!   `SGEN:`     -> `1<random 1-75 char string>`

use log::{error, LevelFilter};
use rand::Rng;
use srpc::Engine;

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

struct Args {
	port: u16,
	service: String,
}

fn parse_args() -> Args {
	let mut args = Args { port: 20000, service: "Echo".to_owned() };
	let mut it = std::env::args().skip(1);

	while let Some(flag) = it.next() {
		let Some(value) = it.next() else {
			eprintln!("usage: echo-server [-p port] [-s service]");
			std::process::exit(1);
		};

		match flag.as_str() {
			"-p" => args.port = value.parse().unwrap_or(args.port),
			"-s" => args.service = value,
			other => eprintln!("unknown flag: {other} {value}"),
		}
	}

	args
}

fn sgen() -> String {
	let mut rng = rand::thread_rng();
	let n = rng.gen_range(1..=75);
	(0..n).map(|_| LETTERS[rng.gen_range(0..LETTERS.len())] as char).collect()
}

fn main() {
	runtime::init_logger(LevelFilter::Info);
	let args = parse_args();

	let engine = Engine::init(Some(args.port)).expect("rpc_init failed");
	let service = match engine.offer(&args.service) {
		Ok(svc) => svc,
		Err(err) => {
			error!("failure offering {} service: {err}", args.service);
			std::process::exit(1);
		}
	};

	let mut buf = vec![0u8; 65536];

	loop {
		let (sender, len) = engine.query(&service, &mut buf);

		if len == 0 {
			continue;
		}

		let text = String::from_utf8_lossy(&buf[..len]);
		let text = text.trim_end_matches('\0');
		let (cmd, rest) = text.split_once(':').unwrap_or((text, ""));

		let resp = match cmd {
			"ECHO" => format!("1{rest}\0"),
			"SINK" => "1\0".to_owned(),
			"SGEN" => format!("1{}\0", sgen()),
			other => format!("0Illegal command {other}\0"),
		};

		if let Err(err) = engine.response(&service, sender, resp.as_bytes()) {
			error!("response to {sender:?} failed: {err}");
		}
	}
}
