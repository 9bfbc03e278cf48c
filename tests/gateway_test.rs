//! End-to-end tests for ddal-gateway
//!
//! The gateway runs on an OS-assigned port in front of an in-memory backend,
//! and the tests speak the MySQL protocol to it with the crate's own codec.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time::timeout;

use ddal_gateway::backend::BackendResult;
use ddal_gateway::config::load_config_from_str;
use ddal_gateway::protocol::mysql::{
    build_handshake_response41, compute_native_password, is_eof_packet, parse_err_packet,
    parse_handshake, parse_ok_packet, read_packet, write_packet, HandshakeResponse41, Packet,
    PayloadReader, COM_INIT_DB, COM_PING, COM_QUERY, COM_QUIT, ER_ACCESS_DENIED_ERROR,
    ER_DBACCESS_DENIED_ERROR, ER_UNKNOWN_COM_ERROR, ER_UNKNOWN_ERROR,
    GATEWAY_CAPABILITIES, MYSQL_NATIVE_PASSWORD,
};
use ddal_gateway::{
    AcquireOptions, BackendConnection, BackendError, ConnectionProvider, GatewayContext,
    HintRouter, Listener, MetricsSnapshot, PreparedStatement, ResultCursor, ShardEngine,
    StaticPrivilege, Value,
};

/// Default test timeout
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

const CONFIG: &str = r#"
server:
  listen_address: "127.0.0.1"
  listen_port: 0
  connect_timeout_secs: 5

users:
  - username: app
    password: secret
    schemas: [orders]

shards:
  shard1:
    host: 127.0.0.1
    username: gw
  shard2:
    host: 127.0.0.1
    username: gw

routing:
  default_shard: shard1
"#;

/// Backend that answers every query with the rows of the shard it runs on
#[derive(Default)]
struct TableBackend {
    log: Mutex<Vec<String>>,
}

impl TableBackend {
    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConnectionProvider for TableBackend {
    async fn acquire(
        &self,
        options: &AcquireOptions,
    ) -> ddal_gateway::Result<Box<dyn BackendConnection>> {
        self.log.lock().unwrap().push(format!("acquire {}", options.shard));
        Ok(Box::new(TableConnection {
            shard: options.shard.clone(),
        }))
    }

    fn release(&self, shard: &str, _connection: Box<dyn BackendConnection>) {
        self.log.lock().unwrap().push(format!("release {}", shard));
    }
}

struct TableConnection {
    shard: String,
}

#[async_trait]
impl BackendConnection for TableConnection {
    fn shard(&self) -> &str {
        &self.shard
    }

    fn is_healthy(&self) -> bool {
        true
    }

    async fn prepare(&mut self, sql: &str) -> BackendResult<Arc<dyn PreparedStatement>> {
        if sql.contains("missing_table") {
            return Err(BackendError::with_code(
                1146,
                "42S02",
                "Table 'orders.missing_table' doesn't exist",
            ));
        }
        Ok(Arc::new(TableStatement {
            shard: self.shard.clone(),
        }))
    }
}

struct TableStatement {
    shard: String,
}

#[async_trait]
impl PreparedStatement for TableStatement {
    fn set_query_timeout(&self, _secs: u64) {}

    fn query_timeout(&self) -> u64 {
        0
    }

    async fn execute_update(&self, _params: &[Value]) -> BackendResult<u64> {
        Ok(3)
    }

    async fn execute_query(&self, _params: &[Value]) -> BackendResult<Box<dyn ResultCursor>> {
        Ok(Box::new(TableCursor {
            columns: vec!["shard".into(), "note".into()],
            rows: VecDeque::from([vec![Value::String(self.shard.clone()), Value::Null]]),
        }))
    }

    async fn cancel(&self) -> BackendResult<()> {
        Ok(())
    }

    async fn close(&self) -> BackendResult<()> {
        Ok(())
    }
}

struct TableCursor {
    columns: Vec<String>,
    rows: VecDeque<Vec<Value>>,
}

#[async_trait]
impl ResultCursor for TableCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    async fn next_row(&mut self) -> BackendResult<Option<Vec<Value>>> {
        Ok(self.rows.pop_front())
    }

    async fn close(&mut self) -> BackendResult<()> {
        Ok(())
    }
}

struct Gateway {
    addr: std::net::SocketAddr,
    backend: Arc<TableBackend>,
    metrics: Arc<ddal_gateway::GatewayMetrics>,
    shutdown_tx: broadcast::Sender<()>,
    handle: tokio::task::JoinHandle<()>,
}

impl Gateway {
    async fn start() -> Self {
        let config = Arc::new(load_config_from_str(CONFIG).expect("config"));
        let backend = Arc::new(TableBackend::default());
        let ctx = GatewayContext::new(
            Arc::clone(&config),
            Arc::new(StaticPrivilege::from_config(&config)),
            Arc::new(ShardEngine::from_config(backend.clone(), &config)),
            Arc::new(HintRouter::from_config(&config)),
        )
        .expect("context");

        let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
        let listener = Listener::bind(Arc::new(ctx), shutdown_rx)
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let metrics = listener.metrics();
        let handle = tokio::spawn(async move {
            listener.run().await.expect("listener");
        });

        Self {
            addr,
            backend,
            metrics,
            shutdown_tx,
            handle,
        }
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    async fn stop(self) {
        self.shutdown_tx.send(()).expect("shutdown");
        self.handle.await.expect("listener task");
    }
}

/// Connect and answer the greeting; returns the stream and the server's reply
async fn login(
    addr: std::net::SocketAddr,
    user: &str,
    password: &str,
    schema: Option<&str>,
) -> (TcpStream, Packet) {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    let greeting = read_packet(&mut stream).await.expect("greeting");
    assert_eq!(greeting.sequence_id, 0);
    let handshake = parse_handshake(&greeting).expect("handshake");

    let response = HandshakeResponse41 {
        capability_flags: GATEWAY_CAPABILITIES,
        character_set: 45,
        username: user.to_string(),
        auth_response: compute_native_password(password, &handshake.challenge().as_bytes()),
        database: schema.map(str::to_string),
        auth_plugin_name: Some(MYSQL_NATIVE_PASSWORD.to_string()),
        ..HandshakeResponse41::default()
    };
    write_packet(
        &mut stream,
        &Packet::new(1, build_handshake_response41(&response)),
    )
    .await
    .expect("send response");
    let reply = read_packet(&mut stream).await.expect("auth reply");
    (stream, reply)
}

async fn command(stream: &mut TcpStream, code: u8, body: &str) -> Packet {
    let mut payload = vec![code];
    payload.extend_from_slice(body.as_bytes());
    write_packet(stream, &Packet::new(0, payload)).await.expect("send command");
    read_packet(stream).await.expect("reply")
}

#[tokio::test]
async fn test_login_and_ping() {
    timeout(TEST_TIMEOUT, async {
        let gateway = Gateway::start().await;

        let (mut stream, reply) = login(gateway.addr, "app", "secret", Some("orders")).await;
        assert_eq!(reply.sequence_id, 2);
        parse_ok_packet(&reply.payload).expect("OK after login");

        let pong = command(&mut stream, COM_PING, "").await;
        assert_eq!(pong.sequence_id, 1);
        parse_ok_packet(&pong.payload).expect("OK for ping");

        let stats = gateway.metrics();
        assert_eq!(stats.auth_successes, 1);
        assert_eq!(stats.connections_accepted, 1);
        gateway.stop().await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn test_wrong_password_denied() {
    timeout(TEST_TIMEOUT, async {
        let gateway = Gateway::start().await;

        let (mut stream, reply) = login(gateway.addr, "app", "wrong", None).await;
        assert_eq!(reply.sequence_id, 2);
        let err = parse_err_packet(&reply.payload).expect("ERR");
        assert_eq!(err.error_code, ER_ACCESS_DENIED_ERROR);
        assert_eq!(err.sql_state_str(), "28000");
        assert!(err.error_message.contains("'app'"));
        assert!(!err.error_message.contains("wrong"));

        // The gateway closes the connection after a failed login
        assert!(read_packet(&mut stream).await.is_err());
        assert_eq!(gateway.metrics().auth_failures, 1);
        assert!(gateway.backend.log().is_empty());
        gateway.stop().await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn test_unknown_user_and_denied_schema() {
    timeout(TEST_TIMEOUT, async {
        let gateway = Gateway::start().await;

        let (_stream, reply) = login(gateway.addr, "mallory", "secret", None).await;
        assert_eq!(
            parse_err_packet(&reply.payload).expect("ERR").error_code,
            ER_ACCESS_DENIED_ERROR
        );

        let (_stream, reply) = login(gateway.addr, "app", "secret", Some("billing")).await;
        assert_eq!(
            parse_err_packet(&reply.payload).expect("ERR").error_code,
            ER_DBACCESS_DENIED_ERROR
        );
        gateway.stop().await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn test_select_fans_out_to_hinted_shards() {
    timeout(TEST_TIMEOUT, async {
        let gateway = Gateway::start().await;
        let (mut stream, reply) = login(gateway.addr, "app", "secret", None).await;
        parse_ok_packet(&reply.payload).expect("OK");

        let mut payload = vec![COM_QUERY];
        payload.extend_from_slice(b"/*+ shards(shard1,shard2) */ SELECT shard, note FROM t");
        write_packet(&mut stream, &Packet::new(0, payload)).await.expect("send");

        // column count, 2 definitions, EOF, 2 rows, EOF
        let mut frames = Vec::new();
        for _ in 0..7 {
            frames.push(read_packet(&mut stream).await.expect("frame"));
        }
        assert_eq!(frames[0].payload, vec![2]);
        assert!(is_eof_packet(&frames[3].payload));
        assert!(is_eof_packet(&frames[6].payload));
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.sequence_id as usize, i + 1);
        }

        let mut shards = Vec::new();
        for row in &frames[4..6] {
            let mut reader = PayloadReader::new(&row.payload);
            shards.push(String::from_utf8(reader.length_encoded_bytes().unwrap().to_vec()).unwrap());
            assert_eq!(reader.u8().unwrap(), 0xFB);
        }
        assert_eq!(shards, vec!["shard1", "shard2"]);

        let log = gateway.backend.log();
        assert_eq!(log.iter().filter(|e| e.starts_with("release")).count(), 2);
        assert_eq!(gateway.metrics().statements_executed, 2);
        gateway.stop().await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn test_update_and_backend_error() {
    timeout(TEST_TIMEOUT, async {
        let gateway = Gateway::start().await;
        let (mut stream, reply) = login(gateway.addr, "app", "secret", None).await;
        parse_ok_packet(&reply.payload).expect("OK");

        let ok = command(&mut stream, COM_QUERY, "UPDATE orders SET paid = 1").await;
        assert_eq!(parse_ok_packet(&ok.payload).expect("OK").affected_rows, 3);

        let err = command(&mut stream, COM_QUERY, "DELETE FROM missing_table").await;
        let err = parse_err_packet(&err.payload).expect("ERR");
        assert_eq!(err.error_code, ER_UNKNOWN_ERROR);
        assert!(err.error_message.contains("shard1"));
        assert!(err.error_message.contains("missing_table"));

        // The connection survives a failed statement
        let pong = command(&mut stream, COM_PING, "").await;
        parse_ok_packet(&pong.payload).expect("OK");
        assert_eq!(gateway.metrics().statements_failed, 1);
        gateway.stop().await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn test_init_db_and_unknown_command() {
    timeout(TEST_TIMEOUT, async {
        let gateway = Gateway::start().await;
        let (mut stream, reply) = login(gateway.addr, "app", "secret", None).await;
        parse_ok_packet(&reply.payload).expect("OK");

        let ok = command(&mut stream, COM_INIT_DB, "orders").await;
        parse_ok_packet(&ok.payload).expect("OK");

        let denied = command(&mut stream, COM_INIT_DB, "billing").await;
        assert_eq!(
            parse_err_packet(&denied.payload).expect("ERR").error_code,
            ER_DBACCESS_DENIED_ERROR
        );

        // COM_FIELD_LIST is not supported
        let unsupported = command(&mut stream, 0x04, "t").await;
        assert_eq!(
            parse_err_packet(&unsupported.payload).expect("ERR").error_code,
            ER_UNKNOWN_COM_ERROR
        );

        write_packet(&mut stream, &Packet::new(0, vec![COM_QUIT]))
            .await
            .expect("quit");
        assert!(read_packet(&mut stream).await.is_err());
        gateway.stop().await;
    })
    .await
    .expect("test timed out");
}
