//! Multi-threaded client of the Echo service: spins up several threads,
//! each independently connecting and issuing a run of ECHO calls with
//! randomly-generated payloads, then reports per-thread timing.

use std::thread;
use std::time::Instant;

use log::{error, info, LevelFilter};
use rand::Rng;
use srpc::{Engine, QueryDescriptor};

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const MAX_THREADS: usize = 100;

struct Args {
	host: String,
	port: u16,
	service: String,
	nlines: usize,
	nthreads: usize,
}

fn parse_args() -> Args {
	let mut args = Args { host: "localhost".to_owned(), port: 20000, service: "Echo".to_owned(), nlines: 1000, nthreads: 2 };
	let mut it = std::env::args().skip(1);

	while let Some(flag) = it.next() {
		let Some(value) = it.next() else {
			eprintln!("usage: mth-client [-t nthreads] [-l nlines] [-h host] [-p port] [-s service]");
			std::process::exit(1);
		};

		match flag.as_str() {
			"-h" => args.host = value,
			"-p" => args.port = value.parse().unwrap_or(args.port),
			"-s" => args.service = value,
			"-l" => args.nlines = value.parse().unwrap_or(args.nlines),
			"-t" => args.nthreads = value.parse::<usize>().unwrap_or(args.nthreads).min(MAX_THREADS),
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

fn client(engine: Engine, host: String, port: u16, service: String, nlines: usize) {
	let conn = match engine.connect(&host, port, &service, 1234) {
		Ok(conn) => conn,
		Err(err) => {
			error!("failure to connect to {service} at {host}:{port}: {err}");
			return;
		}
	};

	let start = Instant::now();
	let mut resp = [0u8; 128];
	let mut count = 0u64;

	for i in 0..nlines {
		count += 1;
		let query = format!("ECHO:{}\0", sgen());

		if let Err(err) = engine.call(conn, &QueryDescriptor::new(query.as_bytes()), &mut resp) {
			error!("{}'th rpc_call() failed: {err}", i + 1);
			break;
		}
	}

	let elapsed = start.elapsed();
	let ms_per_call = if count > 0 { elapsed.as_secs_f64() * 1000.0 / count as f64 } else { 0.0 };
	info!("{:?}: {count} lines Echo'd in {:.3} seconds, {ms_per_call:.3}ms/call", thread::current().id(), elapsed.as_secs_f64());

	engine.disconnect(conn);
}

fn main() {
	runtime::init_logger(LevelFilter::Info);
	let args = parse_args();

	let engine = Engine::init(None).expect("rpc_init failed");

	let handles: Vec<_> = (0..args.nthreads)
		.map(|_| {
			let engine = engine.clone();
			let host = args.host.clone();
			let service = args.service.clone();
			let port = args.port;
			let nlines = args.nlines;
			thread::spawn(move || client(engine, host, port, service, nlines))
		})
		.collect();

	for handle in handles {
		let _ = handle.join();
	}
}
