use crate::backend::Backends;
use crate::protocol::mysql::basic::{client_handshake_response, from_packet, Command};
use crate::protocol::mysql::constants::AuthPluginName::AuthNativePassword;
use crate::protocol::mysql::error_codes::ErrorKind;
use crate::protocol::mysql::packet::packet_reader::PacketReader;
use crate::protocol::mysql::packet::packet_writer::PacketWriter;
use crate::protocol::mysql::packet::writers::{self, OkPayload};
use crate::server::auth::{gen_scramble, AuthProvider};
use crate::server::session::Session;
use crate::server::{default_capabilities, ProxyState, SERVER_VERSION};

use common::ShutdownMessage;
use mysql_common::constants::{CapabilityFlags, StatusFlags};
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// The proxy front-end: owns the accept loop and runs the wire-protocol
/// server side of every client connection, handing commands to a
/// per-connection [`Session`].
pub struct RwSplitServer {
    backends: Arc<Backends>,
    auth: AuthProvider,
    log_queries: bool,
    conn_ids: AtomicU32,
}

impl RwSplitServer {
    pub fn new(backends: Arc<Backends>, auth: AuthProvider, log_queries: bool) -> Self {
        Self {
            backends,
            auth,
            log_queries,
            conn_ids: AtomicU32::new(1),
        }
    }

    /// Accept loop. Runs until the shutdown channel fires, then drains:
    /// the listener is dropped, backend pools close (breaking sessions out
    /// of backend waits), and session tasks observe the same channel.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        shutdown_rx: watch::Receiver<ShutdownMessage>,
    ) -> io::Result<()> {
        info!(
            "ProxySrv {:?} on {}",
            ProxyState::Listening,
            listener.local_addr()?
        );
        let mut accept_shutdown = shutdown_rx.clone();
        loop {
            tokio::select! {
                _ = accept_shutdown.changed() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let _ = stream.set_nodelay(true);
                        let (reader, writer) = stream.into_split();
                        let server = Arc::clone(&self);
                        let session_shutdown = shutdown_rx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = server.connect(reader, writer, session_shutdown).await {
                                match e.kind() {
                                    io::ErrorKind::ConnectionReset
                                    | io::ErrorKind::ConnectionAborted
                                    | io::ErrorKind::BrokenPipe
                                    | io::ErrorKind::UnexpectedEof => {
                                        debug!("ProxySrv session from {peer} dropped: {e}")
                                    }
                                    _ => warn!("ProxySrv session from {peer} failed: {e}"),
                                }
                            }
                        });
                    }
                    Err(e) => warn!("ProxySrv accept error: {e}"),
                }
            }
        }
        info!("ProxySrv {:?}", ProxyState::Draining);
        drop(listener);
        self.backends.shutdown();
        info!("ProxySrv {:?}", ProxyState::Stopped);
        Ok(())
    }

    /// One client connection, handshake to teardown.
    pub async fn connect<R, W>(
        &self,
        reader: R,
        writer: W,
        shutdown_rx: watch::Receiver<ShutdownMessage>,
    ) -> io::Result<()>
    where
        R: AsyncRead + Send + Unpin,
        W: AsyncWrite + Send + Unpin,
    {
        let mut client_reader = PacketReader::new(reader);
        let mut client_writer = PacketWriter::new(writer);

        let salt = gen_scramble();
        let conn_id = self.conn_ids.fetch_add(1, Ordering::Relaxed);
        writers::write_initial_handshake(
            &mut client_writer,
            conn_id,
            salt,
            SERVER_VERSION.as_bytes(),
            default_capabilities(),
        )
        .await?;

        let (seq, handshake_pkt) = client_reader.next_async().await?.ok_or_else(|| {
            io::Error::new(io::ErrorKind::ConnectionAborted, "peer terminated connection")
        })?;
        let handshake = match client_handshake_response(&handshake_pkt) {
            Ok((_, handshake)) => handshake,
            Err(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "bad client handshake",
                ))
            }
        };
        client_writer.set_seq(seq.wrapping_add(1));

        if handshake.client_flag.contains(CapabilityFlags::CLIENT_SSL) {
            writers::write_err_packet(
                ErrorKind::ER_NOT_SUPPORTED_YET,
                b"TLS was not advertised by this server",
                &mut client_writer,
            )
            .await?;
            client_writer.flush_all().await?;
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "client requested SSL despite us not advertising support for it",
            ));
        }
        if !handshake
            .client_flag
            .contains(CapabilityFlags::CLIENT_PROTOCOL_41)
        {
            writers::write_err_packet(
                ErrorKind::ER_NOT_SUPPORTED_YET,
                b"CLIENT_PROTOCOL_41 is required",
                &mut client_writer,
            )
            .await?;
            client_writer.flush_all().await?;
            return Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "protocol incompatibility, CLIENT_PROTOCOL_41 required",
            ));
        }

        let username = handshake.user_string();
        // The client may have answered with a different plugin's proof; ask
        // it to redo the scramble with mysql_native_password.
        let mut auth_response = handshake.auth_response.clone();
        // an absent plugin name means the client already used native password
        let plugin_is_native = handshake.auth_plugin.is_empty()
            || handshake.auth_plugin == AuthNativePassword.as_ref().as_bytes();
        if !plugin_is_native {
            debug!("ProxySrv conn {conn_id} switching auth plugin for {username:?}");
            writers::write_auth_switch_request(&mut client_writer, &salt).await?;
            let (switch_seq, switch_pkt) = client_reader.next_async().await?.ok_or_else(|| {
                io::Error::new(io::ErrorKind::ConnectionAborted, "peer terminated connection")
            })?;
            auth_response = switch_pkt.to_vec();
            client_writer.set_seq(switch_seq.wrapping_add(1));
        }

        let identity = match self.auth.authenticate(&username, &salt, &auth_response) {
            Ok(identity) => identity,
            Err(e) => {
                warn!("ProxySrv conn {conn_id} authentication failed for {username:?}: {e}");
                let (code, state, msg) = e.wire_triple();
                writers::write_server_err_packet(code, &state, msg.as_bytes(), &mut client_writer)
                    .await?;
                client_writer.flush_all().await?;
                return Ok(());
            }
        };

        // only negotiate what both sides understand
        let client_caps = handshake.client_flag & default_capabilities();
        let session = match Session::startup(
            &self.backends,
            &identity,
            client_caps,
            handshake.database_string(),
            self.log_queries,
        )
        .await
        {
            Ok(session) => session,
            Err(e) => {
                // handshake-fatal: pool or backend selection failure
                warn!("ProxySrv conn {conn_id} session startup failed: {e}");
                let (code, state, msg) = e.wire_triple();
                writers::write_server_err_packet(code, &state, msg.as_bytes(), &mut client_writer)
                    .await?;
                client_writer.flush_all().await?;
                return Ok(());
            }
        };

        writers::write_ok_packet(
            &mut client_writer,
            client_caps,
            OkPayload::ok(0, 0, StatusFlags::SERVER_STATUS_AUTOCOMMIT),
        )
        .await?;
        client_writer.flush_all().await?;

        let result = self
            .on_com(&mut client_reader, &mut client_writer, session, shutdown_rx)
            .await;
        result
    }

    /// Command loop: strictly in client arrival order, one command at a
    /// time, until quit/disconnect or a drain.
    async fn on_com<R, W>(
        &self,
        client_reader: &mut PacketReader<R>,
        client_writer: &mut PacketWriter<W>,
        mut session: Session,
        mut shutdown_rx: watch::Receiver<ShutdownMessage>,
    ) -> io::Result<()>
    where
        R: AsyncRead + Send + Unpin,
        W: AsyncWrite + Send + Unpin,
    {
        let mut result = Ok(());
        loop {
            let next_pkt = tokio::select! {
                _ = shutdown_rx.changed() => break,
                pkt = client_reader.next_async() => pkt,
            };
            let (seq, packet) = match next_pkt {
                Ok(Some(pkt)) => pkt,
                Ok(None) => break, // client closed the connection
                Err(e) => {
                    result = Err(e);
                    break;
                }
            };
            client_writer.set_seq(seq.wrapping_add(1));

            let command = match from_packet(&packet) {
                Ok((_, command)) => command,
                Err(_) => {
                    warn!("ProxySrv unparseable command packet, acknowledging");
                    writers::write_ok_packet(
                        client_writer,
                        default_capabilities(),
                        OkPayload::default(),
                    )
                    .await?;
                    client_writer.flush_all().await?;
                    continue;
                }
            };

            let step = match command {
                Command::Query(q) => session.on_query(q, client_writer).await,
                Command::Prepare(q) => session.on_prepare(q, client_writer).await,
                Command::Execute { stmt, params } => {
                    session.on_execute(stmt, params, client_writer).await
                }
                Command::SendLongData { stmt, param, data } => {
                    session.on_send_long_data(stmt, param, data);
                    Ok(())
                }
                Command::Close(stmt) => {
                    // no wire response for COM_STMT_CLOSE
                    session.on_close(stmt).await;
                    Ok(())
                }
                Command::Init(schema) => session.on_init(schema, client_writer).await,
                Command::ListFields(_) => session.on_field_list(client_writer).await,
                Command::Ping => {
                    writers::write_ok_packet(
                        client_writer,
                        default_capabilities(),
                        OkPayload::ok(0, 0, StatusFlags::SERVER_STATUS_AUTOCOMMIT),
                    )
                    .await?;
                    client_writer.flush_all().await
                }
                Command::Quit => break,
                Command::Other(code) => session.on_other(code, client_writer).await,
            };
            if let Err(e) = step {
                result = Err(e);
                break;
            }
        }

        let drain = shutdown_rx.borrow().is_drain();
        session.teardown(drain).await;
        result
    }
}
