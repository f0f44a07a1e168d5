//! Framed connection and listener over real loopback sockets.

use sensa_wire::codec::{self, MessageType};
use sensa_wire::{
    Client, Connection, Gender, Listener, Reply, SampleWriter, Snapshot, UserData, WireError,
    WireMessage,
};
use std::io::Write;
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

fn started_listener() -> Listener {
    let mut listener = Listener::new("127.0.0.1", 0);
    listener.start().expect("bind loopback");
    listener
}

#[test]
fn test_send_and_receive_over_tcp() {
    let listener = started_listener();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let mut connection = listener.accept().unwrap();
        let first = connection.receive_message().unwrap();
        let second = connection.receive_message().unwrap();
        connection.send_message("OK!").unwrap();
        (first, second)
    });

    let big: Vec<u8> = (0..3 * 1024 * 1024).map(|i| (i % 7) as u8).collect();
    let mut client = Connection::connect(addr, Some(Duration::from_secs(5))).unwrap();
    client.send_message(&big).unwrap();
    client.send_message(b"").unwrap();
    let reply = client.receive_message().unwrap();

    let (first, second) = server.join().unwrap();
    assert_eq!(first, big);
    assert!(second.is_empty());
    assert_eq!(reply, b"OK!");
}

#[test]
fn test_truncated_frame_is_data_incomplete() {
    let listener = started_listener();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let mut connection = listener.accept().unwrap();
        connection.receive_message()
    });

    {
        let mut raw = TcpStream::connect(addr).unwrap();
        raw.write_all(&100u32.to_le_bytes()).unwrap();
        raw.write_all(&[0xAB; 50]).unwrap();
        // Dropping closes the socket before the declared length arrives
    }

    let result = server.join().unwrap();
    assert!(matches!(
        result,
        Err(WireError::DataIncomplete {
            expected: 100,
            received: 50
        })
    ));
}

#[test]
fn test_read_timeout_surfaces_as_timeout() {
    let listener = started_listener();
    let addr = listener.local_addr().unwrap();

    let _client = TcpStream::connect(addr).unwrap();
    let mut connection = listener.accept().unwrap();
    connection
        .set_read_timeout(Some(Duration::from_millis(50)))
        .unwrap();

    assert!(matches!(
        connection.receive_message(),
        Err(WireError::Timeout)
    ));
}

#[test]
fn test_listener_lifecycle() {
    let mut listener = Listener::new("127.0.0.1", 0);
    assert!(matches!(listener.accept(), Err(WireError::NotListening)));

    listener.start().unwrap();
    assert!(listener.is_listening());
    listener.set_nonblocking(true).unwrap();
    assert!(listener.try_accept().unwrap().is_none());

    listener.stop();
    assert!(!listener.is_listening());
    assert!(listener.local_addr().is_err());
}

#[test]
fn test_stop_leaves_accepted_connections_open() {
    let mut listener = started_listener();
    let addr = listener.local_addr().unwrap();

    let mut client = Connection::connect(addr, None).unwrap();
    let mut accepted = listener.accept().unwrap();
    listener.stop();

    client.send_message("still here").unwrap();
    assert_eq!(accepted.receive_message().unwrap(), b"still here");
}

#[test]
fn test_client_upload_user() {
    let listener = started_listener();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let mut connection = listener.accept().unwrap();
        let payload = connection.receive_message().unwrap();
        let (envelope, _) = codec::decode(&payload).unwrap();
        connection.send_message(Reply::Ok.to_wire()).unwrap();
        envelope
    });

    let client = Client::new("127.0.0.1", addr.port());
    let user = UserData::new(123, "Test Testenson", 1000, Gender::Other);
    assert_eq!(client.upload_user(&user).unwrap(), Reply::Ok);

    let envelope = server.join().unwrap();
    assert_eq!(envelope.msg_type, MessageType::UserData);
    assert_eq!(envelope.user_id, 123);
}

#[test]
fn test_client_session_stops_on_rejection() {
    let listener = started_listener();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let mut seen = 0;
        for reply in [Reply::Ok, Reply::error("disk full")] {
            let mut connection = listener.accept().unwrap();
            connection.receive_message().unwrap();
            connection.send_message(reply.to_wire()).unwrap();
            seen += 1;
        }
        seen
    });

    let client = Client::new("127.0.0.1", addr.port());
    let user = UserData::new(5, "Five", 0, Gender::Male);
    let snapshots = vec![Snapshot::at(1), Snapshot::at(2)];
    let reply = client.upload_session(&user, &snapshots).unwrap();

    assert_eq!(reply, Reply::Error("disk full".into()));
    assert_eq!(server.join().unwrap(), 2);
}

#[test]
fn test_client_uploads_capture_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sample.mind.gz");
    let user = UserData::new(42, "Test Testenson", 699_746_400, Gender::Male);
    let mut writer = SampleWriter::create(&path, &user).unwrap();
    writer.write_snapshot(&Snapshot::at(1_000)).unwrap();
    writer.write_snapshot(&Snapshot::at(2_000)).unwrap();
    writer.finish().unwrap();

    let listener = started_listener();
    let addr = listener.local_addr().unwrap();
    let server = thread::spawn(move || {
        let mut received = Vec::new();
        for _ in 0..3 {
            let mut connection = listener.accept().unwrap();
            let payload = connection.receive_message().unwrap();
            received.push(codec::decode(&payload).unwrap());
            connection.send_message(Reply::Ok.to_wire()).unwrap();
        }
        received
    });

    let client = Client::new("127.0.0.1", addr.port());
    assert_eq!(client.upload_sample(&path).unwrap(), Reply::Ok);

    let received = server.join().unwrap();
    assert!(received.iter().all(|(envelope, _)| envelope.user_id == 42));
    assert!(matches!(&received[0].1, WireMessage::UserData(u) if u.username == "Test Testenson"));
    assert!(matches!(&received[1].1, WireMessage::Snapshot(s) if s.datetime == 1_000));
    assert!(matches!(&received[2].1, WireMessage::Snapshot(s) if s.datetime == 2_000));
}

#[test]
fn test_client_rejects_missing_capture_file() {
    let client = Client::new("127.0.0.1", 1);
    assert!(matches!(
        client.upload_sample("/nonexistent/sample.mind.gz"),
        Err(WireError::Io(_))
    ));
}
