//! Client for the Echo service: reads lines from stdin, sends each as an
//! `ECHO:`-prefixed query, and writes the echoed reply to stdout.

use std::io::{self, BufRead, Write};
use std::time::Instant;

use log::{error, LevelFilter};
use srpc::{Engine, QueryDescriptor};

struct Args {
	host: String,
	port: u16,
	service: String,
}

fn parse_args() -> Args {
	let mut args = Args { host: "localhost".to_owned(), port: 20000, service: "Echo".to_owned() };
	let mut it = std::env::args().skip(1);

	while let Some(flag) = it.next() {
		let Some(value) = it.next() else {
			eprintln!("usage: echo-client [-h host] [-p port] [-s service]");
			std::process::exit(1);
		};

		match flag.as_str() {
			"-h" => args.host = value,
			"-p" => args.port = value.parse().unwrap_or(args.port),
			"-s" => args.service = value,
			other => eprintln!("unknown flag: {other} {value}"),
		}
	}

	args
}

fn main() {
	runtime::init_logger(LevelFilter::Info);
	let args = parse_args();

	let engine = Engine::init(None).expect("rpc_init failed");
	let conn = match engine.connect(&args.host, args.port, &args.service, 0) {
		Ok(conn) => conn,
		Err(err) => {
			error!("failure to connect to {} at {}:{}: {err}", args.service, args.host, args.port);
			std::process::exit(1);
		}
	};

	let stdin = io::stdin();
	let stdout = io::stdout();
	let mut out = stdout.lock();

	let start = Instant::now();
	let mut count: u64 = 0;
	let mut resp = [0u8; 251];

	for line in stdin.lock().lines() {
		let Ok(line) = line else { break };
		count += 1;

		let query = format!("ECHO:{line}\n\0");
		let descriptor = QueryDescriptor::new(query.as_bytes());

		let n = match engine.call(conn, &descriptor, &mut resp) {
			Ok(n) => n,
			Err(err) => {
				error!("rpc_call() failed: {err}");
				break;
			}
		};

		if n == 0 || resp[0] != b'1' {
			error!("Echo server returned ERR");
			break;
		}

		let end = resp[1..n].iter().position(|&b| b == 0).map(|p| p + 1).unwrap_or(n);
		out.write_all(&resp[1..end]).ok();
		out.write_all(b"\n").ok();
	}

	let elapsed = start.elapsed();
	let ms_per_call = if count > 0 { elapsed.as_secs_f64() * 1000.0 / count as f64 } else { 0.0 };
	eprintln!("{count} lines Echo'd in {:.3} seconds, {ms_per_call:.3}ms/call", elapsed.as_secs_f64());

	engine.disconnect(conn);
}
