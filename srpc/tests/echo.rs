//! End-to-end loopback test: a server thread offers `Echo` and echoes back
//! whatever it receives; a client thread connects and calls it.

use std::thread;

use log::LevelFilter;
use srpc::{Engine, QueryDescriptor};

#[test]
fn echo_round_trip() {
	runtime::init_logger(LevelFilter::Debug);
	let server = Engine::init(Some(0)).expect("server init");
	let (_, server_port) = server.details();

	let service = server.offer("Echo").expect("offer");

	let server_handle = {
		let server = server.clone();
		let service = service.clone();

		thread::spawn(move || {
			let mut buf = [0u8; 256];
			let (sender, n) = server.query(&service, &mut buf);
			let mut resp = Vec::with_capacity(n + 1);
			resp.push(b'1');
			resp.extend_from_slice(&buf[..n]);
			server.response(&service, sender, &resp).expect("response");
		})
	};

	let client = Engine::init(None).expect("client init");
	let conn = client.connect("127.0.0.1", server_port, "Echo", 0).expect("connect");

	let query = b"hello\0";
	let mut resp = [0u8; 64];
	let n = client.call(conn, &QueryDescriptor::new(query), &mut resp).expect("call");

	assert_eq!(resp[0], b'1');
	assert_eq!(&resp[1..n], query.as_slice());

	server_handle.join().unwrap();

	client.disconnect(conn);
	client.shutdown();
	server.shutdown();
}

#[test]
fn duplicate_service_offer_is_rejected() {
	let engine = Engine::init(None).expect("init");
	let _first = engine.offer("Dup").expect("first offer succeeds");
	let second = engine.offer("Dup");

	assert!(second.is_err());
	engine.shutdown();
}

#[test]
fn connect_to_unknown_service_times_out() {
	let server = Engine::init(Some(0)).expect("server init");
	let (_, server_port) = server.details();

	let client = Engine::init(None).expect("client init");
	let result = client.connect("127.0.0.1", server_port, "NoSuchService", 0);

	assert!(result.is_err());

	client.shutdown();
	server.shutdown();
}
