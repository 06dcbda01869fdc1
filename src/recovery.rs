/// TCP retransmission client
///
/// Connects to the exchange's recovery service, logs in, answers
/// heartbeats, sends data requests for missed sequence ranges, and feeds
/// recovered market-data frames back to the pipeline over a bounded
/// channel. Runs entirely on its own thread; the pipeline thread talks to
/// it only through channels and the shutdown flag.
///
/// The TCP stream interleaves two framings: recovery-protocol messages
/// (length-prefixed) and raw market-data frames (ESC + BCD body length).
/// `Reassembler` finds message boundaries in the byte stream for both.

use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use byteorder::{BigEndian, ByteOrder};
use crossbeam_channel::{Receiver, Sender};
use log::{debug, info, warn};

use crate::config::{RecoveryConfig, RecoveryServerConfig};
use crate::error::{FeedError, FeedResult};
use crate::protocol::{CommonHeader, ESC, HEADER_SIZE, TRAILER_SIZE};
use crate::retrans_protocol::{self as wire, MsgHeader, MsgTime, RetransMessage};

/// Fixed operator the client offers in its login request.
const MULTIPLICATION_OPERATOR: u16 = 168;
const READ_CHUNK: usize = 8192;

/// Connection lifecycle of one recovery session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Disconnected,
    Connecting,
    LoggingIn,
    AwaitingLogin,
    LoggedIn,
}

/// One pending retransmission request.
#[derive(Debug, Clone, Copy)]
struct RecoverRequest {
    channel: u16,
    begin_seq: u32,
    count: u16,
}

/// One unit extracted from the TCP byte stream.
#[derive(Debug)]
pub enum Extracted {
    /// A complete market-data frame, ready for `process_frame`.
    MarketData(Vec<u8>),
    /// A complete recovery-protocol message.
    Protocol(MsgHeader, RetransMessage),
}

/// Boundary finder over the recovery TCP stream.
#[derive(Debug, Default)]
pub struct Reassembler {
    buf: Vec<u8>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Try to extract the next complete unit.
    ///
    /// `Ok(None)` means more bytes are needed. `MalformedHeader` means the
    /// buffer claimed to hold a market-data frame but its header does not
    /// decode; the buffer is cleared to restore synchronization and the
    /// caller decides whether to carry on. Any other error is a
    /// recovery-protocol violation.
    pub fn next(&mut self) -> FeedResult<Option<Extracted>> {
        if self.buf.is_empty() {
            return Ok(None);
        }

        if self.buf[0] == ESC {
            if self.buf.len() < HEADER_SIZE {
                return Ok(None);
            }
            let body_len = match CommonHeader::parse(&self.buf).and_then(|h| h.body_length()) {
                Ok(len) => len,
                Err(_) => {
                    self.buf.clear();
                    return Err(FeedError::MalformedHeader);
                }
            };
            let total = HEADER_SIZE + body_len as usize + TRAILER_SIZE;
            if self.buf.len() < total {
                return Ok(None);
            }
            let frame: Vec<u8> = self.buf.drain(..total).collect();
            return Ok(Some(Extracted::MarketData(frame)));
        }

        if self.buf.len() < 2 {
            return Ok(None);
        }
        let msg_size = BigEndian::read_u16(&self.buf[0..2]) as usize;
        let total = 2 + msg_size + 1;
        if self.buf.len() < total {
            return Ok(None);
        }
        let raw: Vec<u8> = self.buf.drain(..total).collect();
        let (header, msg) = wire::decode(&raw)?;
        Ok(Some(Extracted::Protocol(header, msg)))
    }

    pub fn pending_bytes(&self) -> usize {
        self.buf.len()
    }
}

/// Handle to the retransmission thread.
///
/// Dropping the handle signals shutdown and joins the thread.
pub struct RecoveryClient {
    cmd_tx: Sender<RecoverRequest>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl RecoveryClient {
    /// Spawn the client thread. Recovered frames are delivered through
    /// `frame_tx`; the pipeline side holds the receiver and re-enters
    /// them into `process_frame`.
    pub fn start(config: RecoveryConfig, frame_tx: Sender<Vec<u8>>) -> FeedResult<Self> {
        if !config.has_endpoint() {
            return Err(FeedError::Protocol(
                "no recovery server endpoint configured".to_string(),
            ));
        }

        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let handle = thread::Builder::new()
            .name("taifex-recovery".to_string())
            .spawn(move || supervise(config, cmd_rx, frame_tx, flag))
            .map_err(|e| FeedError::ConnectionLost(e.to_string()))?;

        Ok(RecoveryClient {
            cmd_tx,
            shutdown,
            handle: Some(handle),
        })
    }

    /// Queue a retransmission request for `count` messages starting at
    /// `begin_seq`. Never blocks; the request goes out once the session
    /// is logged in.
    pub fn recover(&self, channel: u16, begin_seq: u32, count: u16) {
        let _ = self.cmd_tx.send(RecoverRequest {
            channel,
            begin_seq,
            count,
        });
    }
}

impl Drop for RecoveryClient {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Reconnect loop. Alternates between primary and backup endpoints when
/// both are configured.
fn supervise(
    config: RecoveryConfig,
    cmd_rx: Receiver<RecoverRequest>,
    frame_tx: Sender<Vec<u8>>,
    shutdown: Arc<AtomicBool>,
) {
    let mut prefer_backup = false;
    while !shutdown.load(Ordering::Relaxed) {
        let server = match pick_endpoint(&config, prefer_backup) {
            Some(s) => s,
            None => break,
        };
        match run_session(server, &config, &cmd_rx, &frame_tx, &shutdown) {
            Ok(()) => break,
            Err(e) => warn!(
                "recovery session at {}:{} ended: {e}",
                server.ip, server.port
            ),
        }
        if config.primary.is_some() && config.backup.is_some() {
            prefer_backup = !prefer_backup;
        }
        sleep_with_shutdown(config.reconnect_delay, &shutdown);
    }
    debug!("recovery supervisor exiting");
}

fn transition(state: &mut SessionState, to: SessionState) {
    debug!("recovery: session state {:?} -> {:?}", *state, to);
    *state = to;
}

fn pick_endpoint(config: &RecoveryConfig, prefer_backup: bool) -> Option<&RecoveryServerConfig> {
    if prefer_backup {
        config.backup.as_ref().or(config.primary.as_ref())
    } else {
        config.primary.as_ref().or(config.backup.as_ref())
    }
}

/// One connection lifetime: connect, log in, then pump messages until an
/// error or shutdown. `Ok(())` means shutdown was requested.
fn run_session(
    server: &RecoveryServerConfig,
    config: &RecoveryConfig,
    cmd_rx: &Receiver<RecoverRequest>,
    frame_tx: &Sender<Vec<u8>>,
    shutdown: &AtomicBool,
) -> FeedResult<()> {
    let mut state = SessionState::Disconnected;

    transition(&mut state, SessionState::Connecting);
    info!("recovery: connecting to {}:{}", server.ip, server.port);
    let mut stream = TcpStream::connect((server.ip.as_str(), server.port))
        .map_err(|e| FeedError::ConnectionLost(e.to_string()))?;
    stream.set_nodelay(true).ok();
    stream
        .set_read_timeout(Some(config.recv_timeout))
        .map_err(|e| FeedError::ConnectionLost(e.to_string()))?;

    // Client sequence restarts at zero with every login.
    let mut client_seq: u32 = 0;
    transition(&mut state, SessionState::LoggingIn);
    let login = RetransMessage::LoginRequest {
        multiplication_operator: MULTIPLICATION_OPERATOR,
        check_code: wire::login_check_code(MULTIPLICATION_OPERATOR, server.password),
        session_id: server.session_id,
    };
    send_message(&mut stream, &login, &mut client_seq)?;
    transition(&mut state, SessionState::AwaitingLogin);
    debug!("recovery: login request sent, session {}", server.session_id);

    let mut reasm = Reassembler::new();
    let mut read_buf = [0u8; READ_CHUNK];

    loop {
        if shutdown.load(Ordering::Relaxed) {
            return Ok(());
        }

        // Requests queue until the server says it is ready for them.
        if state == SessionState::LoggedIn {
            while let Ok(req) = cmd_rx.try_recv() {
                info!(
                    "recovery: requesting channel {} seq {} count {}",
                    req.channel, req.begin_seq, req.count
                );
                let msg = RetransMessage::DataRequest {
                    channel_id: req.channel,
                    begin_seq: req.begin_seq,
                    recover_num: req.count,
                };
                send_message(&mut stream, &msg, &mut client_seq)?;
            }
        }

        let n = match stream.read(&mut read_buf) {
            Ok(0) => return Err(FeedError::ConnectionLost("peer closed".to_string())),
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                continue
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(FeedError::ConnectionLost(e.to_string())),
        };
        reasm.extend(&read_buf[..n]);

        loop {
            match reasm.next() {
                Ok(Some(Extracted::MarketData(frame))) => {
                    if !deliver_frame(frame_tx, frame) {
                        return Ok(());
                    }
                }
                Ok(Some(Extracted::Protocol(header, msg))) => {
                    state = handle_protocol_message(
                        &mut stream,
                        state,
                        header,
                        msg,
                        &mut client_seq,
                        frame_tx,
                    )?;
                }
                Ok(None) => break,
                Err(FeedError::MalformedHeader) => {
                    warn!("recovery: desynchronized market-data framing, buffer dropped");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Blocking hand-off to the pipeline thread. A closed receiver means the
/// facade is gone, which is treated like shutdown.
fn deliver_frame(frame_tx: &Sender<Vec<u8>>, frame: Vec<u8>) -> bool {
    debug!("recovery: recovered frame of {} bytes", frame.len());
    frame_tx.send(frame).is_ok()
}

fn handle_protocol_message(
    stream: &mut TcpStream,
    state: SessionState,
    header: MsgHeader,
    msg: RetransMessage,
    client_seq: &mut u32,
    frame_tx: &Sender<Vec<u8>>,
) -> FeedResult<SessionState> {
    match msg {
        RetransMessage::LoginResponse { channel_id } => {
            info!("recovery: login acknowledged for channel {channel_id}");
            Ok(state)
        }
        RetransMessage::RetransmissionReady => {
            info!("recovery: login complete, requests enabled");
            Ok(SessionState::LoggedIn)
        }
        RetransMessage::ServerHeartbeat => {
            send_message(stream, &RetransMessage::ClientHeartbeat, client_seq)?;
            Ok(state)
        }
        RetransMessage::DataResponse {
            channel_id,
            status,
            begin_seq,
            recover_num,
            data,
        } => {
            if status != 0 {
                warn!(
                    "recovery: request for channel {channel_id} seq {begin_seq} \
                     count {recover_num} failed with status {status}"
                );
            } else {
                debug!(
                    "recovery: data response for channel {channel_id} seq {begin_seq} \
                     count {recover_num}, {} embedded bytes",
                    data.len()
                );
            }
            // Most servers stream the frames after the 102; some embed
            // them in the payload. Either way they are plain frames.
            if !data.is_empty() {
                forward_embedded_frames(&data, frame_tx);
            }
            Ok(state)
        }
        RetransMessage::ErrorNotification { status } => Err(FeedError::Protocol(format!(
            "server error notification, status {status}"
        ))),
        RetransMessage::LoginRequest { .. }
        | RetransMessage::DataRequest { .. }
        | RetransMessage::ClientHeartbeat => Err(FeedError::Protocol(format!(
            "unexpected message type {} from server",
            header.msg_type
        ))),
    }
}

/// Split a 102 payload into the whole market-data frames it carries.
fn forward_embedded_frames(data: &[u8], frame_tx: &Sender<Vec<u8>>) {
    let mut splitter = Reassembler::new();
    splitter.extend(data);
    loop {
        match splitter.next() {
            Ok(Some(Extracted::MarketData(frame))) => {
                if !deliver_frame(frame_tx, frame) {
                    return;
                }
            }
            Ok(Some(Extracted::Protocol(header, _))) => {
                warn!(
                    "recovery: protocol message type {} embedded in data response, ignored",
                    header.msg_type
                );
            }
            Ok(None) => {
                if splitter.pending_bytes() > 0 {
                    warn!(
                        "recovery: {} trailing bytes in data response payload",
                        splitter.pending_bytes()
                    );
                }
                return;
            }
            Err(e) => {
                warn!("recovery: malformed data response payload: {e}");
                return;
            }
        }
    }
}

fn send_message(
    stream: &mut TcpStream,
    msg: &RetransMessage,
    client_seq: &mut u32,
) -> FeedResult<()> {
    let bytes = wire::encode(msg, *client_seq, MsgTime::now());
    *client_seq += 1;
    stream
        .write_all(&bytes)
        .map_err(|e| FeedError::ConnectionLost(e.to_string()))
}

fn sleep_with_shutdown(total: Duration, shutdown: &AtomicBool) {
    let slice = Duration::from_millis(100);
    let mut remaining = total;
    while remaining > Duration::ZERO && !shutdown.load(Ordering::Relaxed) {
        let step = remaining.min(slice);
        thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
}
