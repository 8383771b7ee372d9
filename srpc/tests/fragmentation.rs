//! Exercises request/response payloads larger than `FR_SIZE`, forcing the
//! FRAGMENT/FACK exchange on both directions of one call.

use std::thread;

use srpc::config::FR_SIZE;
use srpc::{Engine, QueryDescriptor};

#[test]
fn multi_fragment_round_trip() {
	let server = Engine::init(Some(0)).expect("server init");
	let (_, server_port) = server.details();
	let service = server.offer("Reverse").expect("offer");

	let request_len = 3000;
	let expected_request: Vec<u8> = (0..request_len).map(|i| (i % 256) as u8).collect();
	let expected_response: Vec<u8> = (0..request_len).map(|i| 255u8.wrapping_sub((i % 256) as u8)).collect();

	let server_handle = {
		let server = server.clone();
		let service = service.clone();
		let expected_request = expected_request.clone();
		let expected_response = expected_response.clone();

		thread::spawn(move || {
			let mut buf = vec![0u8; request_len + 16];
			let (sender, n) = server.query(&service, &mut buf);
			assert_eq!(n, expected_request.len());
			assert_eq!(&buf[..n], expected_request.as_slice());
			server.response(&service, sender, &expected_response).expect("response");
		})
	};

	let client = Engine::init(None).expect("client init");
	let conn = client.connect("127.0.0.1", server_port, "Reverse", 0).expect("connect");

	let mut resp = vec![0u8; request_len + 16];
	let n = client.call(conn, &QueryDescriptor::new(&expected_request), &mut resp).expect("call");

	assert_eq!(n, expected_response.len());
	assert_eq!(&resp[..n], expected_response.as_slice());

	server_handle.join().unwrap();

	client.disconnect(conn);
	client.shutdown();
	server.shutdown();
}

#[test]
fn payload_exactly_fr_size_is_a_single_fragment() {
	assert_eq!(srpc::wire::fragment_count(FR_SIZE, FR_SIZE), 1);
	assert_eq!(srpc::wire::fragment_count(FR_SIZE + 1, FR_SIZE), 2);
}
