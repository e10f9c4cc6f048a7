use crate::common::greeter_engine;
use bugstalker_dap::config::{Listen, ServerConfig};
use bugstalker_dap::protocol::io::DapReader;
use bugstalker_dap::server::Server;
use serde_json::{json, Value};
use serial_test::serial;
use std::io::Write;
use std::net::TcpStream;
use std::time::Duration;

struct Client {
    stream: TcpStream,
    reader: DapReader,
    seq: i64,
}

impl Client {
    fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let reader = DapReader::new(stream.try_clone().unwrap(), None);
        Self {
            stream,
            reader,
            seq: 0,
        }
    }

    fn send(&mut self, command: &str, arguments: Value) -> i64 {
        self.seq += 1;
        let message = json!({
            "seq": self.seq,
            "type": "request",
            "command": command,
            "arguments": arguments,
        })
        .to_string();
        write!(
            self.stream,
            "Content-Length: {}\r\n\r\n{}",
            message.len(),
            message
        )
        .unwrap();
        self.seq
    }

    fn read(&mut self) -> Value {
        self.reader.read_message().unwrap()
    }
}

fn tcp_config() -> ServerConfig {
    ServerConfig {
        listen: Listen::Tcp("127.0.0.1:0".to_string()),
        oneshot: true,
        ..ServerConfig::default()
    }
}

#[test]
#[serial]
fn test_tcp_session() {
    let server = Server::new(greeter_engine(), tcp_config()).unwrap();
    let addr = server.start().unwrap().unwrap();
    assert!(server.start().is_err());
    assert!(!server.wait_for_client(Some(Duration::from_millis(10))));

    let mut client = Client::connect(addr);
    let seq = client.send("initialize", json!({ "adapterID": "test" }));
    let response = client.read();
    assert_eq!(response["type"], "response");
    assert_eq!(response["request_seq"], seq);
    assert_eq!(response["success"], true);
    let event = client.read();
    assert_eq!(event["event"], "initialized");

    client.send("launch", json!({}));
    assert_eq!(client.read()["success"], true);
    client.send("configurationDone", Value::Null);
    assert_eq!(client.read()["success"], true);
    assert!(server.wait_for_client(Some(Duration::from_secs(5))));

    let seq = client.send("disconnect", json!({}));
    let response = client.read();
    assert_eq!(response["request_seq"], seq);
    assert_eq!(response["success"], true);

    server.join();
    assert!(server.session().is_none());
}

#[test]
#[serial]
fn test_children_announced() {
    let server = Server::new(greeter_engine(), tcp_config()).unwrap();
    assert!(!server.child_spawned("worker", 4242, "/tmp/worker.sock"));
    let addr = server.start().unwrap().unwrap();

    let mut client = Client::connect(addr);
    let event = client.read();
    assert_eq!(event["event"], "childSpawned");
    assert_eq!(
        event["body"],
        json!({ "name": "worker", "pid": 4242, "socket": "/tmp/worker.sock" })
    );
    assert_eq!(server.children().len(), 1);

    client.send("disconnect", json!({}));
    assert_eq!(client.read()["success"], true);
    server.join();
}

#[test]
#[serial]
fn test_client_gone() {
    let server = Server::new(greeter_engine(), tcp_config()).unwrap();
    let addr = server.start().unwrap().unwrap();

    let mut client = Client::connect(addr);
    client.send("initialize", Value::Null);
    client.read();
    drop(client);

    // the session ends on EOF, oneshot server stops
    server.join();
    assert!(server.session().is_none());
}
