//! Wire messages exchanged with out-of-process workers.
//!
//! Each message is a bincode payload behind a little-endian `u32` length
//! prefix. Floats travel bit-exact, so NaN and infinite bounds survive.

use std::io::{ErrorKind, Read, Write};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::{Action, EnvDyn, GymError, Info, InfoValue, Observation, RenderFrame, Result, Step};
use crate::spaces::SpaceSpec;

/// Largest payload either side accepts.
pub const MAX_FRAME_LEN: usize = 256 << 20;

/// Parent to host.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Request {
    Reset { seed: Option<u64> },
    Step { action: Action },
    GetAttr { key: String },
    SetAttr { key: String, value: InfoValue },
    Spaces,
    Render,
    Close,
}

/// Host to parent. Every request gets exactly one response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Response {
    Reset { observation: Observation, info: Info },
    Step(Step<Observation>),
    Attr(InfoValue),
    AttrSet,
    Spaces { action: SpaceSpec, observation: SpaceSpec },
    Render(Option<RenderFrame>),
    Closed,
    Error(WireError),
}

/// The part of a host-side error that survives the trip back.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum WireError {
    Attribute(String),
    InvalidAction(String),
    InvalidConfig(String),
    Other(String),
}

impl From<&GymError> for WireError {
    fn from(err: &GymError) -> Self {
        match err {
            GymError::Attribute(key) => WireError::Attribute(key.clone()),
            GymError::InvalidAction(msg) => WireError::InvalidAction(msg.clone()),
            GymError::InvalidConfig(msg) => WireError::InvalidConfig(msg.clone()),
            other => WireError::Other(other.to_string()),
        }
    }
}

impl From<WireError> for GymError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Attribute(key) => GymError::Attribute(key),
            WireError::InvalidAction(msg) => GymError::InvalidAction(msg),
            WireError::InvalidConfig(msg) => GymError::InvalidConfig(msg),
            WireError::Other(msg) => GymError::Other(msg),
        }
    }
}

/// Host an environment over a framed stream until `Close` or end of input.
///
/// The environment is closed on both paths.
pub fn serve<R: Read, W: Write>(env: &mut dyn EnvDyn, mut reader: R, mut writer: W) -> Result<()> {
    while let Some(frame) = read_frame(&mut reader)? {
        let (response, stop) = match decode_frame::<Request>(&frame) {
            Ok(request) => handle(env, request),
            Err(e) => {
                warn!(error = %e, "undecodable request");
                (Response::Error(WireError::Other(format!("undecodable request: {e}"))), false)
            }
        };
        write_frame(&mut writer, &response)?;
        if stop {
            debug!("close requested, host exiting");
            return Ok(());
        }
    }
    debug!("parent hung up, host exiting");
    env.close();
    Ok(())
}

fn handle(env: &mut dyn EnvDyn, request: Request) -> (Response, bool) {
    let response = match request {
        Request::Reset { seed } => env.reset(seed).map(|(observation, info)| Response::Reset { observation, info }),
        Request::Step { action } => env.step(&action).map(Response::Step),
        Request::GetAttr { key } => env.get_attr(&key).map(Response::Attr),
        Request::SetAttr { key, value } => env.set_attr(&key, value).map(|()| Response::AttrSet),
        Request::Spaces => Ok(Response::Spaces { action: env.action_space(), observation: env.observation_space() }),
        Request::Render => Ok(Response::Render(env.render())),
        Request::Close => {
            env.close();
            return (Response::Closed, true);
        }
    };
    (response.unwrap_or_else(|e| Response::Error(WireError::from(&e))), false)
}

/// Encode `message` and write it as one frame.
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, message: &T) -> Result<()> {
    let size = bincode::serialized_size(message)? as usize;
    if size > MAX_FRAME_LEN {
        return Err(GymError::Protocol(format!("message of {size} bytes exceeds the frame limit")));
    }
    let mut frame = Vec::with_capacity(4 + size);
    frame.extend_from_slice(&(size as u32).to_le_bytes());
    bincode::serialize_into(&mut frame, message)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame's payload. `None` means the stream ended between frames.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(GymError::Protocol(format!("frame of {len} bytes exceeds the frame limit")));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(Some(payload))
}

pub fn decode_frame<T: DeserializeOwned>(payload: &[u8]) -> Result<T> { Ok(bincode::deserialize(payload)?) }
