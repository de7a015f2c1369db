// Request/response plumbing shared by the child-process and socket workers.
//
// A reader thread per connection decodes response frames into a channel, so
// readiness is "the channel has something" and `wait` is a channel select.

use std::io::{BufReader, Read, Write};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Select, Sender};
use tracing::{debug, trace, warn};

use super::protocol::{decode_frame, read_frame, write_frame, Request, Response};
use super::WorkerResult;
use crate::core::{Action, GymError, InfoValue, RenderFrame, Result};
use crate::spaces::SpaceSpec;

pub(crate) struct Connection {
    label: String,
    writer: Option<Box<dyn Write + Send>>,
    inbox: Receiver<Result<Response>>,
    reader: Option<JoinHandle<()>>,
    awaiting: bool,
    dead: bool,
}

impl Connection {
    pub(crate) fn new<R>(label: String, reader: R, writer: Box<dyn Write + Send>) -> Result<Self>
    where
        R: Read + Send + 'static,
    {
        let (tx, inbox) = crossbeam_channel::unbounded();
        let thread_label = label.clone();
        let reader = std::thread::Builder::new()
            .name(format!("{label}-reader"))
            .spawn(move || read_loop(&thread_label, BufReader::new(reader), tx))?;
        Ok(Self { label, writer: Some(writer), inbox, reader: Some(reader), awaiting: false, dead: false })
    }

    pub(crate) fn label(&self) -> &str { &self.label }

    pub(crate) fn inbox(&self) -> &Receiver<Result<Response>> { &self.inbox }

    fn died(&self, detail: impl std::fmt::Display) -> GymError {
        GymError::WorkerDied(format!("{}: {detail}", self.label))
    }

    fn send(&mut self, request: &Request) -> Result<()> {
        if self.dead {
            return Err(self.died("connection is gone"));
        }
        if self.awaiting {
            return Err(GymError::Precondition(format!("{}: previous request not yet received", self.label)));
        }
        let writer = self.writer.as_mut().ok_or_else(|| GymError::WorkerDied("connection shut down".into()))?;
        trace!(worker = %self.label, ?request, "send");
        if let Err(e) = write_frame(writer, request) {
            self.dead = true;
            return Err(self.died(e));
        }
        self.awaiting = true;
        Ok(())
    }

    fn receive(&mut self) -> Result<Response> { self.receive_by(None) }

    fn receive_by(&mut self, deadline: Option<Instant>) -> Result<Response> {
        if !self.awaiting {
            return Err(GymError::NotReady(format!("{}: recv called without a pending send", self.label)));
        }
        self.awaiting = false;
        let message = match deadline {
            None => self.inbox.recv().unwrap_or_else(|_| Err(self.died("connection closed"))),
            Some(deadline) => match self.inbox.recv_deadline(deadline) {
                Ok(message) => message,
                Err(RecvTimeoutError::Timeout) => {
                    // A late answer would pair with the wrong request.
                    self.dead = true;
                    return Err(self.died("no answer before the deadline"));
                }
                Err(RecvTimeoutError::Disconnected) => Err(self.died("connection closed")),
            },
        };
        if matches!(message, Err(GymError::WorkerDied(_)) | Err(GymError::Protocol(_))) {
            self.dead = true;
        }
        match message? {
            Response::Error(e) => Err(e.into()),
            response => Ok(response),
        }
    }

    fn call(&mut self, request: &Request) -> Result<Response> {
        self.send(request)?;
        self.receive()
    }

    fn unexpected(&self, response: Response) -> GymError {
        GymError::Protocol(format!("{}: unexpected response {response:?}", self.label))
    }

    pub(crate) fn send_reset(&mut self, seed: Option<u64>) -> Result<()> { self.send(&Request::Reset { seed }) }

    pub(crate) fn send_step(&mut self, action: Action) -> Result<()> { self.send(&Request::Step { action }) }

    pub(crate) fn recv_result(&mut self) -> Result<WorkerResult> {
        match self.receive()? {
            Response::Reset { observation, info } => Ok(WorkerResult::Reset(observation, info)),
            Response::Step(step) => Ok(WorkerResult::Step(step)),
            other => Err(self.unexpected(other)),
        }
    }

    pub(crate) fn get_attr(&mut self, key: &str) -> Result<InfoValue> {
        match self.call(&Request::GetAttr { key: key.to_string() })? {
            Response::Attr(value) => Ok(value),
            other => Err(self.unexpected(other)),
        }
    }

    pub(crate) fn set_attr(&mut self, key: &str, value: InfoValue) -> Result<()> {
        match self.call(&Request::SetAttr { key: key.to_string(), value })? {
            Response::AttrSet => Ok(()),
            other => Err(self.unexpected(other)),
        }
    }

    /// Fetch the hosted environment's spaces, giving up after `timeout`.
    pub(crate) fn handshake(&mut self, timeout: Duration) -> Result<(SpaceSpec, SpaceSpec)> {
        self.send(&Request::Spaces)?;
        match self.receive_by(Some(Instant::now() + timeout))? {
            Response::Spaces { action, observation } => Ok((action, observation)),
            other => Err(self.unexpected(other)),
        }
    }

    pub(crate) fn render(&mut self) -> Result<Option<RenderFrame>> {
        match self.call(&Request::Render)? {
            Response::Render(frame) => Ok(frame),
            other => Err(self.unexpected(other)),
        }
    }

    /// Ask the host to close, give it `grace` to acknowledge, then drop the write half.
    ///
    /// Results of a still-outstanding request are discarded. Returns whether
    /// the host acknowledged.
    pub(crate) fn shutdown(&mut self, grace: Duration) -> bool {
        let mut acknowledged = false;
        if !self.dead {
            self.awaiting = false;
            if self.send(&Request::Close).is_ok() {
                let deadline = Instant::now() + grace;
                loop {
                    match self.inbox.recv_deadline(deadline) {
                        Ok(Ok(Response::Closed)) => {
                            acknowledged = true;
                            break;
                        }
                        Ok(Ok(other)) => trace!(worker = %self.label, ?other, "discarding response during close"),
                        Ok(Err(_)) | Err(_) => break,
                    }
                }
            }
        }
        if !acknowledged {
            warn!(worker = %self.label, "host did not acknowledge close");
        }
        self.awaiting = false;
        self.dead = true;
        self.writer = None;
        acknowledged
    }

    /// Wait for the reader thread; only call once the read half is closed.
    pub(crate) fn join_reader(&mut self) {
        if let Some(handle) = self.reader.take() {
            if handle.join().is_err() {
                warn!(worker = %self.label, "reader thread panicked");
            }
        }
    }
}

fn read_loop<R: Read>(label: &str, mut reader: R, tx: Sender<Result<Response>>) {
    loop {
        let message = match read_frame(&mut reader) {
            Ok(Some(frame)) => decode_frame::<Response>(&frame)
                .map_err(|e| GymError::Protocol(format!("{label}: undecodable response: {e}"))),
            Ok(None) => break,
            Err(e) => Err(GymError::WorkerDied(format!("{label}: {e}"))),
        };
        let fatal = message.is_err();
        if tx.send(message).is_err() || fatal {
            return;
        }
    }
    debug!(worker = %label, "connection reached end of stream");
    // Always leave a final message so a dead connection reads as ready.
    let _ = tx.send(Err(GymError::WorkerDied(format!("{label}: connection closed"))));
}

/// Positions of the inboxes holding a message, gathering up to `wait_num`.
pub(crate) fn wait_ready(
    inboxes: &[&Receiver<Result<Response>>],
    wait_num: usize,
    timeout: Option<Duration>,
) -> Vec<usize> {
    let deadline = timeout.map(|t| Instant::now() + t);
    let mut ready = Vec::new();
    let mut pending: Vec<usize> = Vec::new();
    for (pos, inbox) in inboxes.iter().enumerate() {
        if inbox.is_empty() { pending.push(pos) } else { ready.push(pos) }
    }
    while ready.len() < wait_num && !pending.is_empty() {
        let mut select = Select::new();
        for &pos in &pending {
            select.recv(inboxes[pos]);
        }
        let picked = match deadline {
            Some(deadline) => match select.ready_deadline(deadline) {
                Ok(picked) => picked,
                Err(_) => break,
            },
            None => select.ready(),
        };
        // `ready` may wake spuriously; only a non-empty inbox counts.
        if !inboxes[pending[picked]].is_empty() {
            ready.push(pending.remove(picked));
        } else if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
    }
    ready.truncate(wait_num);
    ready.sort_unstable();
    ready
}
