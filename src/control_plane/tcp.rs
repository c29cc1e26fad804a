//! Loopback TCP control plane.
//!
//! Same commands as the console, one per line; every line gets a one-line
//! reply (`ok`, `ok paused`, `ok running`, or `err <reason>`). One client is
//! served at a time. A client disconnecting does not stop the pipeline; only
//! `quit`, Ctrl-C or the producer finishing ends the plane. A client that
//! sends a line longer than `MAX_LINE_BYTES` (newline included) gets
//! `err line too long` and is disconnected without the line being run.

use anyhow::{anyhow, Result};
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc::Receiver;
use std::time::Duration;

use super::{
    interrupted, Command, ControlCallbacks, ControlPlane, Dispatcher, ProducerWatch, PLANE_POLL,
};

const MAX_LINE_BYTES: usize = 256;
const READ_TIMEOUT: Duration = Duration::from_millis(50);

pub struct TcpControl {
    listener: TcpListener,
    addr: SocketAddr,
    dispatcher: Dispatcher,
    interrupt: Option<Receiver<()>>,
}

enum Session {
    Continue,
    Exit,
}

impl TcpControl {
    /// Bind the control socket. Only loopback addresses are accepted.
    pub fn bind(addr: &str, interrupt: Option<Receiver<()>>) -> Result<Self> {
        let configured: SocketAddr = addr
            .parse()
            .map_err(|e| anyhow!("invalid control address '{}': {}", addr, e))?;
        if !configured.ip().is_loopback() {
            return Err(anyhow!(
                "control address '{}' must be a loopback address",
                configured
            ));
        }
        let listener = TcpListener::bind(configured)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;
        log::info!("tcp control listening on {}", addr);
        Ok(Self {
            listener,
            addr,
            dispatcher: Dispatcher::new(),
            interrupt,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    fn should_stop(&mut self, producer: &ProducerWatch) -> bool {
        if producer.is_finished() {
            log::info!("producer finished; closing tcp control");
            return true;
        }
        if interrupted(self.interrupt.as_ref()) {
            self.dispatcher.close();
            return true;
        }
        false
    }

    fn serve(&mut self, stream: TcpStream, producer: &ProducerWatch) -> Result<Session> {
        let peer = stream.peer_addr()?;
        if !peer.ip().is_loopback() {
            return Ok(Session::Continue);
        }
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        let mut writer = stream.try_clone()?;
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        log::debug!("tcp control client {} connected", peer);

        loop {
            if self.should_stop(producer) {
                return Ok(Session::Exit);
            }
            let limit = (MAX_LINE_BYTES + 1 - buf.len()) as u64;
            let read = (&mut reader).take(limit).read_until(b'\n', &mut buf);
            if buf.len() > MAX_LINE_BYTES {
                log::warn!("tcp control client {} sent an overlong line; disconnecting", peer);
                writeln!(writer, "err line too long")?;
                return Ok(Session::Continue);
            }
            match read {
                Ok(0) => {
                    log::debug!("tcp control client {} disconnected", peer);
                    return Ok(Session::Continue);
                }
                Ok(_) if buf.ends_with(b"\n") => {
                    let line = String::from_utf8_lossy(&buf).into_owned();
                    buf.clear();
                    if line.trim().is_empty() {
                        continue;
                    }
                    let (reply, exit) = match line.parse::<Command>() {
                        Ok(cmd) => {
                            let exit = self.dispatcher.dispatch(cmd);
                            (self.reply_for(cmd), exit)
                        }
                        Err(err) => (format!("err {}", err), false),
                    };
                    writeln!(writer, "{}", reply)?;
                    if exit {
                        return Ok(Session::Exit);
                    }
                }
                Ok(_) => {
                    // Partial line at EOF.
                    return Ok(Session::Continue);
                }
                Err(err)
                    if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut => {}
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn reply_for(&self, cmd: Command) -> String {
        match cmd {
            Command::TogglePause | Command::SetPaused(_) => {
                if self.dispatcher.is_paused() {
                    "ok paused".to_string()
                } else {
                    "ok running".to_string()
                }
            }
            _ => "ok".to_string(),
        }
    }
}

impl ControlPlane for TcpControl {
    fn name(&self) -> &'static str {
        "tcp"
    }

    fn register(&mut self, callbacks: ControlCallbacks) {
        self.dispatcher.register(callbacks);
    }

    fn run(&mut self, producer: &ProducerWatch) -> Result<()> {
        loop {
            if self.should_stop(producer) {
                return Ok(());
            }
            match self.listener.accept() {
                Ok((stream, _)) => match self.serve(stream, producer) {
                    Ok(Session::Exit) => return Ok(()),
                    Ok(Session::Continue) => {}
                    Err(err) => log::warn!("tcp control session ended: {}", err),
                },
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(PLANE_POLL);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}
