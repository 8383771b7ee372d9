//! Callback client: offers a `Handler` service, connects to a `Callback`
//! server, asks it to start delivering periodic events back to `Handler`,
//! waits out a delay, then asks it to stop.
//!
//! main thread: offers `Handler`, spawns the handler thread, connects to
//! `Callback`, sends a `connect` command, sleeps, sends a `disconnect`
//! command, exits.
//!
//! handler thread: for each event message received on `Handler`, prints it
//! and replies `OK`.

use std::thread;
use std::time::Duration;

use log::{error, info, LevelFilter};
use srpc::{Engine, QueryDescriptor, ServiceHandle};

const CB_PORT: u16 = 20001;
const CB_NAME: &str = "Callback";

struct Args {
	target: String,
	port: u16,
	service: String,
	minutes: u64,
}

fn parse_args() -> Args {
	let mut args = Args { target: "localhost".to_owned(), port: CB_PORT, service: "Handler".to_owned(), minutes: 5 };
	let mut it = std::env::args().skip(1);

	while let Some(flag) = it.next() {
		let Some(value) = it.next() else {
			eprintln!("usage: callback-client [-h host] [-p port] [-s service] [-t minutes]");
			std::process::exit(1);
		};

		match flag.as_str() {
			"-h" => args.target = value,
			"-p" => args.port = value.parse().unwrap_or(args.port),
			"-s" => args.service = value,
			"-t" => args.minutes = value.parse().unwrap_or(args.minutes),
			other => eprintln!("unknown flag: {other} {value}"),
		}
	}

	args
}

fn handler_thread(engine: Engine, service: ServiceHandle) {
	let mut event = [0u8; 100];

	loop {
		let (sender, len) = engine.query(&service, &mut event);

		if len == 0 {
			continue;
		}

		let text = String::from_utf8_lossy(&event[..len]);
		info!("client: {}", text.trim_end_matches('\0'));

		if let Err(err) = engine.response(&service, sender, b"OK\0") {
			error!("response to {sender:?} failed: {err}");
		}
	}
}

fn main() {
	runtime::init_logger(LevelFilter::Info);
	let args = parse_args();

	let engine = Engine::init(None).expect("rpc_init failed");

	let service = match engine.offer(&args.service) {
		Ok(svc) => svc,
		Err(err) => {
			error!("failure offering {} service: {err}", args.service);
			std::process::exit(1);
		}
	};

	let (myhost, myport) = engine.details();

	{
		let engine = engine.clone();
		let service = service.clone();
		thread::spawn(move || handler_thread(engine, service));
	}

	let conn = match engine.connect(&args.target, args.port, CB_NAME, 1) {
		Ok(conn) => conn,
		Err(err) => {
			error!("error connecting to {CB_NAME} service: {err}");
			std::process::exit(1);
		}
	};

	let mut resp = [0u8; 100];

	let query = format!("connect {myhost} {myport} {}\0", args.service);
	match engine.call(conn, &QueryDescriptor::new(query.as_bytes()), &mut resp) {
		Ok(n) => info!("client: response to connect command: '{}'", String::from_utf8_lossy(&resp[..n]).trim_end_matches('\0')),
		Err(err) => {
			error!("error issuing connect command: {err}");
			std::process::exit(1);
		}
	}

	thread::sleep(Duration::from_secs(60 * args.minutes));

	let query = format!("disconnect {myhost} {myport} {}\0", args.service);
	match engine.call(conn, &QueryDescriptor::new(query.as_bytes()), &mut resp) {
		Ok(n) => info!("client: response to disconnect command: '{}'", String::from_utf8_lossy(&resp[..n]).trim_end_matches('\0')),
		Err(err) => {
			error!("error issuing disconnect command: {err}");
			std::process::exit(1);
		}
	}

	engine.disconnect(conn);
}
