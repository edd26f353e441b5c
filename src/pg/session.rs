//! PostgreSQL session over TCP.
//!
//! Handles:
//! - Startup and authentication (cleartext, MD5, SCRAM-SHA-256)
//! - Simple query protocol for plain SQL text
//! - Extended query protocol for out-of-band parameters and named plans
//!
//! Server errors are folded into a failed [`ExecResult`]; only transport and
//! protocol failures surface as `Err`, and they leave the session closed.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter, ReadHalf, WriteHalf};
use tokio::net::TcpStream;

use super::config::PgConfig;
use super::error::{PgError, PgResult};
use super::protocol::*;
use super::scram::{self, ScramClient};
use crate::engine::{Engine, ExecResult, ExecStatus, RowBuffer, Session, TransactionStatus};
use crate::error::{Error, Result};

// ============================================================================
// Engine
// ============================================================================

/// Engine that opens [`PgSession`]s from `postgres://` connection URLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgEngine;

impl Engine for PgEngine {
    type Session = PgSession;

    async fn connect(&self, info: &str) -> Result<PgSession> {
        let config =
            PgConfig::from_url(info).map_err(|e| Error::ConnectionEstablish(e.to_string()))?;
        PgSession::connect(config)
            .await
            .map_err(|e| Error::ConnectionEstablish(e.to_string()))
    }
}

// ============================================================================
// Session
// ============================================================================

/// One authenticated PostgreSQL backend connection.
pub struct PgSession {
    reader: BufReader<ReadHalf<TcpStream>>,
    writer: BufWriter<WriteHalf<TcpStream>>,
    config: PgConfig,
    transaction_status: TransactionStatus,
    /// Server parameters (e.g., server_version, client_encoding)
    parameters: HashMap<String, String>,
    /// Column names of open named portals; Execute does not resend them
    portals: HashMap<String, Vec<String>>,
    closed: bool,
    read_buffer: BytesMut,
}

impl PgSession {
    /// Connect and authenticate.
    pub async fn connect(config: PgConfig) -> PgResult<Self> {
        let stream = TcpStream::connect(config.address()).await?;
        stream.set_nodelay(true)?;

        let (read_half, write_half) = tokio::io::split(stream);
        let mut session = Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            config,
            transaction_status: TransactionStatus::Idle,
            parameters: HashMap::new(),
            portals: HashMap::new(),
            closed: false,
            read_buffer: BytesMut::with_capacity(32768),
        };

        session.startup().await?;
        tracing::debug!(
            host = %session.config.host,
            database = %session.config.database,
            "session established"
        );
        Ok(session)
    }

    /// Server parameter reported during startup or later (e.g. `server_version`).
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    async fn startup(&mut self) -> PgResult<()> {
        let startup = StartupMessage {
            user: self.config.user.clone(),
            database: Some(self.config.database.clone()),
            options: self
                .config
                .application_name
                .as_ref()
                .map(|name| vec![("application_name".to_string(), name.clone())])
                .unwrap_or_default(),
        };
        self.send_message(&startup).await?;

        loop {
            match self.receive_message().await? {
                BackendMessage::AuthenticationOk => {}
                BackendMessage::AuthenticationCleartextPassword => {
                    let password = self.password()?.to_string();
                    self.send_message(&PasswordMessage { password }).await?;
                }
                BackendMessage::AuthenticationMD5Password { salt } => {
                    let password = md5_password(&self.config.user, self.password()?, &salt);
                    self.send_message(&PasswordMessage { password }).await?;
                }
                BackendMessage::AuthenticationSASL { mechanisms } => {
                    if !mechanisms.iter().any(|m| m == scram::MECHANISM) {
                        return Err(PgError::Auth(format!(
                            "Server requires unsupported SASL mechanisms: {:?}",
                            mechanisms
                        )));
                    }
                    self.authenticate_scram().await?;
                }
                BackendMessage::ParameterStatus { name, value } => {
                    self.parameters.insert(name, value);
                }
                BackendMessage::ReadyForQuery { status } => {
                    self.transaction_status = status;
                    return Ok(());
                }
                BackendMessage::ErrorResponse { fields } => {
                    return Err(PgError::from_fields(&fields));
                }
                _ => {}
            }
        }
    }

    async fn authenticate_scram(&mut self) -> PgResult<()> {
        let mut scram = ScramClient::new(&self.config.user, self.password()?);
        let initial = SaslInitialResponseMessage {
            mechanism: scram::MECHANISM.to_string(),
            data: scram.client_first_message(),
        };
        self.send_message(&initial).await?;

        loop {
            match self.receive_message().await? {
                BackendMessage::AuthenticationSASLContinue { data } => {
                    let data = scram
                        .process_server_first(&data)
                        .map_err(|e| PgError::Auth(e.to_string()))?;
                    self.send_message(&SaslResponseMessage { data }).await?;
                }
                BackendMessage::AuthenticationSASLFinal { data } => {
                    return scram
                        .verify_server_final(&data)
                        .map_err(|e| PgError::Auth(e.to_string()));
                }
                BackendMessage::ErrorResponse { fields } => {
                    return Err(PgError::from_fields(&fields));
                }
                _ => {}
            }
        }
    }

    fn password(&self) -> PgResult<&str> {
        self.config
            .password
            .as_deref()
            .ok_or_else(|| PgError::Auth("Password required".to_string()))
    }

    // ========================================================================
    // Query protocols
    // ========================================================================

    async fn simple_query(&mut self, sql: &str) -> PgResult<ExecResult> {
        self.ensure_open()?;
        self.send_message(&QueryMessage {
            query: sql.to_string(),
        })
        .await?;
        self.read_results().await
    }

    /// Bind `params` to `statement` (empty for the unnamed one) and run it.
    async fn bind_and_execute(
        &mut self,
        statement: &str,
        params: &[Option<String>],
    ) -> PgResult<ExecResult> {
        self.buffer_message(&BindMessage {
            portal: "",
            statement,
            params,
        })
        .await?;
        self.buffer_message(&DescribeMessage {
            kind: b'P',
            name: String::new(),
        })
        .await?;
        self.buffer_message(&ExecuteMessage {
            portal: String::new(),
            max_rows: 0,
        })
        .await?;
        self.buffer_message(&SyncMessage).await?;
        self.flush().await?;
        self.read_results().await
    }

    async fn parse(&mut self, name: &str, sql: &str) -> PgResult<()> {
        self.buffer_message(&ParseMessage {
            name: name.to_string(),
            query: sql.to_string(),
        })
        .await
    }

    /// Collect everything up to ReadyForQuery into one result.
    ///
    /// With several statements the last result wins; any error wins over
    /// everything else.
    async fn read_results(&mut self) -> PgResult<ExecResult> {
        self.read_rows(None).await
    }

    /// Like [`Self::read_results`], for an Execute whose RowDescription was
    /// received earlier: rows arriving without one use `columns`.
    async fn read_rows(&mut self, columns: Option<Vec<String>>) -> PgResult<ExecResult> {
        let mut last = ExecResult::new(ExecStatus::CommandOk);
        let mut current = columns.map(|columns| {
            let mut result = ExecResult::new(ExecStatus::TuplesOk);
            result.rows = RowBuffer::new(columns);
            result
        });
        let mut error: Option<String> = None;

        loop {
            match self.receive_message().await? {
                BackendMessage::RowDescription { columns } => {
                    let mut result = ExecResult::new(ExecStatus::TuplesOk);
                    result.rows = RowBuffer::new(columns);
                    current = Some(result);
                }
                BackendMessage::DataRow { values } => {
                    if let Some(result) = current.as_mut() {
                        result.rows.push_row(values);
                    }
                }
                BackendMessage::CommandComplete { tag } => {
                    let mut result = current
                        .take()
                        .unwrap_or_else(|| ExecResult::new(ExecStatus::CommandOk));
                    result.command_tag = tag;
                    last = result;
                }
                BackendMessage::EmptyQueryResponse => {
                    last = ExecResult::new(ExecStatus::EmptyQuery);
                }
                BackendMessage::CopyInResponse => {
                    // No data source is attached to a session; abort the copy.
                    self.send_message(&CopyFailMessage {
                        reason: "COPY FROM STDIN is not supported".to_string(),
                    })
                    .await?;
                }
                BackendMessage::CopyBothResponse => {
                    return Err(PgError::Protocol(
                        "COPY BOTH (replication) is not supported".to_string(),
                    ));
                }
                BackendMessage::ErrorResponse { fields } => {
                    let err = PgError::from_fields(&fields);
                    if error.is_none() {
                        error = Some(err.to_string());
                    }
                }
                BackendMessage::NoticeResponse { fields } => {
                    tracing::debug!(
                        notice = fields.get(&b'M').map(String::as_str).unwrap_or_default(),
                        "server notice"
                    );
                }
                BackendMessage::ParameterStatus { name, value } => {
                    self.parameters.insert(name, value);
                }
                BackendMessage::ReadyForQuery { status } => {
                    self.transaction_status = status;
                    if status == TransactionStatus::Idle {
                        // Named portals do not outlive their transaction
                        self.portals.clear();
                    }
                    return Ok(match error {
                        Some(message) => ExecResult::failed(message),
                        None => current.unwrap_or(last),
                    });
                }
                _ => {}
            }
        }
    }

    /// Record a transport failure; the stream cannot be trusted afterwards.
    fn fail(&mut self, err: PgError) -> Error {
        if !self.closed {
            tracing::warn!(error = %err, "session failed, closing");
            self.closed = true;
        }
        err.into()
    }

    fn ensure_open(&self) -> PgResult<()> {
        if self.closed {
            return Err(PgError::ConnectionClosed);
        }
        Ok(())
    }

    fn check_param_count(params: &[Option<String>]) -> Result<()> {
        if params.len() > MAX_PARAMETERS {
            return Err(Error::Binding(format!(
                "{} parameters exceed the protocol limit of {}",
                params.len(),
                MAX_PARAMETERS
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Private helpers
    // ========================================================================

    /// Send a frontend message (with flush).
    async fn send_message<M: FrontendMessage>(&mut self, msg: &M) -> PgResult<()> {
        self.buffer_message(msg).await?;
        self.flush().await
    }

    /// Buffer a frontend message without flushing (for pipelining).
    #[inline]
    async fn buffer_message<M: FrontendMessage>(&mut self, msg: &M) -> PgResult<()> {
        self.writer.write_all(&msg.encode()).await?;
        Ok(())
    }

    #[inline]
    async fn flush(&mut self) -> PgResult<()> {
        self.writer.flush().await?;
        Ok(())
    }

    async fn receive_message(&mut self) -> PgResult<BackendMessage> {
        loop {
            if let Some(total_len) = complete_message_len(&self.read_buffer)? {
                let msg_bytes = self.read_buffer.split_to(total_len);
                return BackendMessage::decode(&mut Bytes::from(msg_bytes));
            }

            let mut buf = [0u8; 4096];
            let n = self.reader.read(&mut buf).await?;
            if n == 0 {
                return Err(PgError::ConnectionClosed);
            }
            self.read_buffer.extend_from_slice(&buf[..n]);
        }
    }
}

impl Session for PgSession {
    async fn execute(&mut self, sql: &str) -> Result<ExecResult> {
        let result = self.simple_query(sql).await;
        result.map_err(|e| self.fail(e))
    }

    async fn execute_params(&mut self, sql: &str, params: &[Option<String>]) -> Result<ExecResult> {
        Self::check_param_count(params)?;
        let result = async {
            self.ensure_open()?;
            self.parse("", sql).await?;
            self.bind_and_execute("", params).await
        }
        .await;
        result.map_err(|e| self.fail(e))
    }

    async fn prepare(&mut self, name: &str, sql: &str) -> Result<ExecResult> {
        let result = async {
            self.ensure_open()?;
            self.parse(name, sql).await?;
            self.send_message(&SyncMessage).await?;
            self.read_results().await
        }
        .await;
        result.map_err(|e| self.fail(e))
    }

    async fn execute_prepared(
        &mut self,
        name: &str,
        params: &[Option<String>],
    ) -> Result<ExecResult> {
        Self::check_param_count(params)?;
        let result = async {
            self.ensure_open()?;
            self.bind_and_execute(name, params).await
        }
        .await;
        result.map_err(|e| self.fail(e))
    }

    async fn bind_portal(
        &mut self,
        portal: &str,
        statement: &str,
        params: &[Option<String>],
    ) -> Result<ExecResult> {
        Self::check_param_count(params)?;
        let result = async {
            self.ensure_open()?;
            self.buffer_message(&BindMessage {
                portal,
                statement,
                params,
            })
            .await?;
            self.buffer_message(&DescribeMessage {
                kind: b'P',
                name: portal.to_string(),
            })
            .await?;
            self.buffer_message(&SyncMessage).await?;
            self.flush().await?;
            let result = self.read_results().await?;
            if result.status.is_success() {
                let rows = &result.rows;
                let columns = (0..rows.column_count())
                    .filter_map(|c| rows.column_name(c).map(str::to_string))
                    .collect();
                self.portals.insert(portal.to_string(), columns);
            }
            Ok(result)
        }
        .await;
        result.map_err(|e| self.fail(e))
    }

    async fn execute_portal(&mut self, portal: &str, max_rows: u32) -> Result<ExecResult> {
        let result = async {
            self.ensure_open()?;
            let columns = self.portals.get(portal).cloned();
            self.buffer_message(&ExecuteMessage {
                portal: portal.to_string(),
                max_rows: i32::try_from(max_rows).unwrap_or(i32::MAX),
            })
            .await?;
            self.buffer_message(&SyncMessage).await?;
            self.flush().await?;
            self.read_rows(columns).await
        }
        .await;
        result.map_err(|e| self.fail(e))
    }

    async fn close_portal(&mut self, portal: &str) -> Result<ExecResult> {
        let result = async {
            self.ensure_open()?;
            self.buffer_message(&CloseMessage {
                kind: b'P',
                name: portal.to_string(),
            })
            .await?;
            self.buffer_message(&SyncMessage).await?;
            self.flush().await?;
            self.portals.remove(portal);
            self.read_results().await
        }
        .await;
        result.map_err(|e| self.fail(e))
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        // Best effort: the server may already be gone.
        if self.send_message(&TerminateMessage).await.is_ok() {
            let _ = self.writer.shutdown().await;
        }
    }
}

// ============================================================================
// Helper functions
// ============================================================================

/// `md5` + MD5(MD5(password + user) + salt), as hex.
fn md5_password(user: &str, password: &str, salt: &[u8; 4]) -> String {
    let inner_hex = format!("{:x}", md5::compute(format!("{}{}", password, user)));
    let mut outer_input = inner_hex.into_bytes();
    outer_input.extend_from_slice(salt);
    format!("md5{:x}", md5::compute(&outer_input))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    fn backend(tag: u8, body: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        out.extend_from_slice(&(body.len() as i32 + 4).to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    fn row_description(names: &[&str]) -> Vec<u8> {
        let mut body = (names.len() as i16).to_be_bytes().to_vec();
        for name in names {
            body.extend_from_slice(name.as_bytes());
            body.push(0);
            body.extend_from_slice(&[0u8; 18]);
        }
        backend(b'T', &body)
    }

    fn data_row(cells: &[Option<&str>]) -> Vec<u8> {
        let mut body = (cells.len() as i16).to_be_bytes().to_vec();
        for cell in cells {
            match cell {
                Some(text) => {
                    body.extend_from_slice(&(text.len() as i32).to_be_bytes());
                    body.extend_from_slice(text.as_bytes());
                }
                None => body.extend_from_slice(&(-1i32).to_be_bytes()),
            }
        }
        backend(b'D', &body)
    }

    fn complete(tag: &str) -> Vec<u8> {
        backend(b'C', format!("{tag}\0").as_bytes())
    }

    fn ready(status: u8) -> Vec<u8> {
        backend(b'Z', &[status])
    }

    /// Minimal scripted backend. Answers each request (a Query or a Sync)
    /// with the next reply and returns the tags of every frontend message.
    async fn fake_server(replies: Vec<Vec<u8>>) -> (String, JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("postgres://tester@{}/db", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let len = socket.read_i32().await.unwrap();
            let mut startup = vec![0u8; len as usize - 4];
            socket.read_exact(&mut startup).await.unwrap();

            let mut hello = backend(b'R', &0i32.to_be_bytes());
            hello.extend(backend(b'S', b"server_version\x0016.2\0"));
            hello.extend(ready(b'I'));
            socket.write_all(&hello).await.unwrap();

            let mut tags = Vec::new();
            let mut replies = replies.into_iter();
            loop {
                let Ok(tag) = socket.read_u8().await else {
                    break;
                };
                let len = socket.read_i32().await.unwrap();
                let mut body = vec![0u8; len as usize - 4];
                socket.read_exact(&mut body).await.unwrap();
                tags.push(tag);
                match tag {
                    b'Q' | b'S' => match replies.next() {
                        Some(reply) => socket.write_all(&reply).await.unwrap(),
                        None => break,
                    },
                    b'X' => break,
                    _ => {}
                }
            }
            tags
        });

        (url, handle)
    }

    #[tokio::test]
    async fn test_simple_query_last_result_wins() {
        let reply = [
            row_description(&["a"]),
            data_row(&[Some("1")]),
            complete("SELECT 1"),
            row_description(&["b", "c"]),
            data_row(&[Some("x"), None]),
            complete("SELECT 1"),
            ready(b'I'),
        ]
        .concat();
        let (url, server) = fake_server(vec![reply]).await;

        let mut session = PgEngine.connect(&url).await.unwrap();
        assert_eq!(session.parameter("server_version"), Some("16.2"));

        let result = session
            .execute("SELECT 1 AS a; SELECT 'x' AS b, NULL AS c")
            .await
            .unwrap();
        assert_eq!(result.status, ExecStatus::TuplesOk);
        assert_eq!(result.command_tag, "SELECT 1");
        assert_eq!(result.rows.column_count(), 2);
        assert_eq!(result.rows.value(0, 0), Some(&b"x"[..]));
        assert_eq!(result.rows.is_null(0, 1), Some(true));

        session.close().await;
        assert!(session.is_closed());
        assert_eq!(server.await.unwrap(), vec![b'Q', b'X']);
    }

    #[tokio::test]
    async fn test_server_error_is_a_failed_result() {
        let reply = [
            backend(b'E', b"SERROR\0C42P01\0Mrelation \"nope\" does not exist\0\0"),
            ready(b'I'),
        ]
        .concat();
        let (url, _server) = fake_server(vec![reply]).await;

        let mut session = PgEngine.connect(&url).await.unwrap();
        let result = session.execute("SELECT * FROM nope").await.unwrap();

        assert_eq!(result.status, ExecStatus::FatalError);
        let message = result.error_message.unwrap();
        assert!(message.contains("42P01"));
        assert!(message.contains("nope"));
        assert!(!session.is_closed());
    }

    #[tokio::test]
    async fn test_transaction_status_tracking() {
        let replies = vec![
            [complete("BEGIN"), ready(b'T')].concat(),
            [complete("COMMIT"), ready(b'I')].concat(),
        ];
        let (url, _server) = fake_server(replies).await;

        let mut session = PgEngine.connect(&url).await.unwrap();
        assert_eq!(session.transaction_status(), TransactionStatus::Idle);

        let result = session.execute("BEGIN").await.unwrap();
        assert_eq!(result.status, ExecStatus::CommandOk);
        assert_eq!(session.transaction_status(), TransactionStatus::InTransaction);

        session.execute("COMMIT").await.unwrap();
        assert_eq!(session.transaction_status(), TransactionStatus::Idle);
    }

    #[tokio::test]
    async fn test_extended_protocol_message_flow() {
        let replies = vec![
            // execute_params
            [
                backend(b'1', &[]),
                backend(b'2', &[]),
                row_description(&["n"]),
                data_row(&[Some("42")]),
                complete("SELECT 1"),
                ready(b'I'),
            ]
            .concat(),
            // prepare
            [backend(b'1', &[]), ready(b'I')].concat(),
            // execute_prepared
            [backend(b'2', &[]), backend(b'n', &[]), complete("INSERT 0 1"), ready(b'I')]
                .concat(),
        ];
        let (url, server) = fake_server(replies).await;

        let mut session = PgEngine.connect(&url).await.unwrap();

        let params = vec![Some("42".to_string())];
        let result = session.execute_params("SELECT $1::int AS n", &params).await.unwrap();
        assert_eq!(result.status, ExecStatus::TuplesOk);
        assert_eq!(result.rows.value(0, 0), Some(&b"42"[..]));

        let result = session
            .prepare("__pq_plan_0", "INSERT INTO t VALUES ($1)")
            .await
            .unwrap();
        assert_eq!(result.status, ExecStatus::CommandOk);

        let result = session.execute_prepared("__pq_plan_0", &[None]).await.unwrap();
        assert_eq!(result.status, ExecStatus::CommandOk);
        assert_eq!(result.affected_rows(), 1);

        session.close().await;
        assert_eq!(
            server.await.unwrap(),
            vec![b'P', b'B', b'D', b'E', b'S', b'P', b'S', b'B', b'D', b'E', b'S', b'X']
        );
    }

    #[tokio::test]
    async fn test_dropped_connection_closes_session() {
        let (url, _server) = fake_server(vec![]).await;

        let mut session = PgEngine.connect(&url).await.unwrap();
        assert!(session.execute("SELECT 1").await.is_err());
        assert!(session.is_closed());
        assert!(session.execute("SELECT 1").await.is_err());
    }

    #[tokio::test]
    async fn test_portal_rows_arrive_in_batches() {
        let bound = [backend(b'2', &[]), row_description(&["n"]), ready(b'T')].concat();
        let first = [
            data_row(&[Some("1")]),
            data_row(&[Some("2")]),
            backend(b's', &[]),
            ready(b'T'),
        ]
        .concat();
        let last = [data_row(&[Some("3")]), complete("SELECT 1"), ready(b'T')].concat();
        let closed = [backend(b'3', &[]), ready(b'T')].concat();
        let (url, server) = fake_server(vec![bound, first, last, closed]).await;

        let mut session = PgEngine.connect(&url).await.unwrap();
        let result = session.bind_portal("c1", "plan", &[]).await.unwrap();
        assert_eq!(result.rows.column_name(0), Some("n"));
        assert!(result.rows.is_empty());

        let batch = session.execute_portal("c1", 2).await.unwrap();
        assert_eq!(batch.rows.len(), 2);
        assert_eq!(batch.rows.column_index("n"), Some(0));
        assert_eq!(batch.rows.value(1, 0), Some(&b"2"[..]));

        let batch = session.execute_portal("c1", 2).await.unwrap();
        assert_eq!(batch.rows.len(), 1);
        assert_eq!(batch.command_tag, "SELECT 1");

        assert!(session.close_portal("c1").await.unwrap().status.is_success());
        session.close().await;
        assert_eq!(
            server.await.unwrap(),
            vec![b'B', b'D', b'S', b'E', b'S', b'E', b'S', b'C', b'S', b'X']
        );
    }

    #[tokio::test]
    async fn test_corrupt_frame_closes_session() {
        let (url, _server) = fake_server(vec![vec![b'Z', 0xff, 0xff, 0xff, 0xff, b'I']]).await;

        let mut session = PgEngine.connect(&url).await.unwrap();
        let err = session.execute("SELECT 1").await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_connect_failure_is_establish_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = PgEngine
            .connect(&format!("postgres://tester@{}/db", addr))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::ConnectionEstablish(_)));

        let err = PgEngine.connect("mysql://nowhere").await.err().unwrap();
        assert!(matches!(err, Error::ConnectionEstablish(_)));
    }

    #[test]
    fn test_md5_password_shape() {
        let a = md5_password("postgres", "secret", &[1, 2, 3, 4]);
        let b = md5_password("postgres", "secret", &[4, 3, 2, 1]);
        assert!(a.starts_with("md5"));
        assert_eq!(a.len(), 35);
        assert_ne!(a, b);
        assert_eq!(a, md5_password("postgres", "secret", &[1, 2, 3, 4]));
    }
}
