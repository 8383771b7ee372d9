//! Callback server: offers a `Callback` service accepting two commands,
//! encoded as EOS-terminated strings:
//!
//!   `connect host port service`    — starts delivering periodic "event
//!                                    occurred" calls to host:port/service
//!   `disconnect host port service` — stops delivering them
//!
//! A background timer thread walks the list of active callbacks every tick
//! (20ms, the same tick the engine's own timer uses) and fires an event
//! once each callback's randomly-chosen interval (15-30s) elapses.

use std::sync::{Arc, Mutex};
use std::thread;

use log::{error, info, LevelFilter};
use rand::Rng;
use srpc::config::TICK;
use srpc::{ConnHandle, Engine, QueryDescriptor};

const CB_PORT: u16 = 20001;
const CB_NAME: &str = "Callback";

struct Callback {
	id: u64,
	conn: ConnHandle,
	host: String,
	service: String,
	port: u16,
	ticks: u16,
	ticks_left: u16,
}

struct State {
	callbacks: Vec<Callback>,
	next_id: u64,
}

fn generate_ticks() -> u16 {
	rand::thread_rng().gen_range(750..1500)
}

fn timer_thread(engine: Engine, state: Arc<Mutex<State>>) {
	let mut event = [0u8; 100];
	let mut resp = [0u8; 100];

	loop {
		thread::sleep(TICK);
		let mut guard = state.lock().unwrap_or_else(|e| e.into_inner());

		for cb in guard.callbacks.iter_mut() {
			cb.ticks_left = cb.ticks_left.saturating_sub(1);

			if cb.ticks_left == 0 {
				cb.ticks_left = cb.ticks;
				let text = format!("{:08x} event occurred\0", cb.id);
				let n = text.len();
				event[..n].copy_from_slice(text.as_bytes());

				match engine.call(cb.conn, &QueryDescriptor::with_len(&event, n), &mut resp) {
					Ok(rn) => info!(
						"server: response from {:08x}/{}/{}/{}: {}",
						cb.id,
						cb.host,
						cb.port,
						cb.service,
						String::from_utf8_lossy(&resp[..rn]).trim_end_matches('\0')
					),
					Err(err) => error!("server: error sending event to {:08x}: {err}", cb.id),
				}
			}
		}
	}
}

fn main() {
	runtime::init_logger(LevelFilter::Info);

	let engine = Engine::init(Some(CB_PORT)).expect("rpc_init failed");
	let service = match engine.offer(CB_NAME) {
		Ok(svc) => svc,
		Err(err) => {
			error!("failure offering {CB_NAME} service: {err}");
			std::process::exit(1);
		}
	};

	let state = Arc::new(Mutex::new(State { callbacks: Vec::new(), next_id: 1 }));

	{
		let engine = engine.clone();
		let state = state.clone();
		thread::spawn(move || timer_thread(engine, state));
	}

	let mut buf = [0u8; 100];

	loop {
		let (sender, len) = engine.query(&service, &mut buf);

		if len == 0 {
			continue;
		}

		let text = String::from_utf8_lossy(&buf[..len]);
		let text = text.trim_end_matches('\0');
		let mut fields = text.split_whitespace();
		let (cmd, host, port, svc_name) = (fields.next(), fields.next(), fields.next(), fields.next());

		info!("server: query received \"{text}\"");

		let resp = match (cmd, host, port.and_then(|p| p.parse::<u16>().ok()), svc_name) {
			(Some("connect"), Some(host), Some(port), Some(svc_name)) => match engine.connect(host, port, svc_name, 1) {
				Ok(conn) => {
					let mut guard = state.lock().unwrap_or_else(|e| e.into_inner());
					let id = guard.next_id;
					guard.next_id += 1;
					let ticks = generate_ticks();
					guard.callbacks.push(Callback {
						id,
						conn,
						host: host.to_owned(),
						service: svc_name.to_owned(),
						port,
						ticks,
						ticks_left: ticks,
					});
					format!("OK {id:08x}\0")
				}
				Err(_) => "ERR failure to connect\0".to_owned(),
			},
			(Some("disconnect"), Some(host), Some(port), Some(svc_name)) => {
				let mut guard = state.lock().unwrap_or_else(|e| e.into_inner());
				let pos = guard.callbacks.iter().position(|cb| cb.host == host && cb.port == port && cb.service == svc_name);

				match pos {
					Some(idx) => {
						let cb = guard.callbacks.remove(idx);
						engine.disconnect(cb.conn);
						format!("OK {:08x}\0", cb.id)
					}
					None => "ERR unknown callback identifier\0".to_owned(),
				}
			}
			_ => "ERR illegal command\0".to_owned(),
		};

		info!("server: response sent: {}", resp.trim_end_matches('\0'));

		if let Err(err) = engine.response(&service, sender, resp.as_bytes()) {
			error!("response to {sender:?} failed: {err}");
		}
	}
}
