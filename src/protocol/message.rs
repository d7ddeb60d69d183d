//! Control-channel command and reply messages
//!
//! Commands flow from the server to the agent, replies the other way. Both
//! are closed tagged unions sharing one integer tag space on the wire:
//! commands carry a `cmd_id` field, replies a `rply_id` field. The tag
//! registry is the pair of `match` blocks below; adding a message kind means
//! adding one variant and one arm on each side.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};

/// Tag for OK messages
pub const TAG_OK: u8 = 0;
/// Tag for error messages
pub const TAG_ERROR: u8 = 1;
/// Tag for registration messages
pub const TAG_REGISTER: u8 = 3;
/// Tag for job creation messages
pub const TAG_CREATE_JOB: u8 = 4;
/// Tag for job stop messages
pub const TAG_STOP_JOB: u8 = 5;
/// Tag for job data messages
pub const TAG_JOB_DATA: u8 = 6;

/// A command sent from the server to the agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// No-op acknowledgment
    Ok,
    /// Error notification with a human-readable message
    Error(String),
    /// Registration handshake carrying the server-assigned client id
    Register { client_id: String },
    /// Ask the agent to instantiate the named module as a new job
    CreateJob { module_name: String },
    /// Ask the agent to stop a running job
    StopJob { job_id: u64 },
    /// Opaque data for a running job; only the owning module interprets it
    JobData { job_id: u64, data: String },
}

/// A reply sent from the agent to the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// No-op acknowledgment
    Ok,
    /// Error notification with a human-readable message
    Error(String),
    /// Registration handshake response echoing the client id
    Registered { client_id: String },
    /// A job was created under the agent-assigned id
    JobCreated { job_id: u64, module_name: String },
    /// A job was stopped
    JobStopped { job_id: u64 },
    /// Opaque data from a running job
    JobData { job_id: u64, data: String },
}

/// Flat wire representation of the inner message JSON.
///
/// Field names match the reference wire format. Exactly one of `cmd_id` and
/// `rply_id` is present depending on direction.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RawFrame {
    /// Command tag, present on server-to-agent frames
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmd_id: Option<u8>,
    /// Reply tag, present on agent-to-server frames
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rply_id: Option<u8>,
    /// Client id for registration frames
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_uuid: Option<String>,
    /// Module name for job creation frames
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
    /// Job id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<u64>,
    /// Opaque job payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_data: Option<String>,
    /// Error message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_data: Option<String>,
}

impl RawFrame {
    fn missing(field: &str) -> ProtocolError {
        ProtocolError::MalformedEnvelope(format!("missing field: {field}"))
    }

    fn take_client_uuid(&mut self) -> Result<String, ProtocolError> {
        self.client_uuid.take().ok_or_else(|| Self::missing("client_uuid"))
    }

    fn take_job_name(&mut self) -> Result<String, ProtocolError> {
        self.job_name.take().ok_or_else(|| Self::missing("job_name"))
    }

    fn take_job_id(&mut self) -> Result<u64, ProtocolError> {
        self.job_id.ok_or_else(|| Self::missing("job_id"))
    }

    fn take_job_data(&mut self) -> Result<String, ProtocolError> {
        self.job_data.take().ok_or_else(|| Self::missing("job_data"))
    }
}

impl Command {
    /// The wire tag of this command
    pub fn tag(&self) -> u8 {
        match self {
            Command::Ok => TAG_OK,
            Command::Error(_) => TAG_ERROR,
            Command::Register { .. } => TAG_REGISTER,
            Command::CreateJob { .. } => TAG_CREATE_JOB,
            Command::StopJob { .. } => TAG_STOP_JOB,
            Command::JobData { .. } => TAG_JOB_DATA,
        }
    }

    /// Convert into the flat wire frame
    pub fn to_frame(&self) -> RawFrame {
        let mut frame = RawFrame {
            cmd_id: Some(self.tag()),
            ..Default::default()
        };
        match self {
            Command::Ok => {}
            Command::Error(message) => frame.error_data = Some(message.clone()),
            Command::Register { client_id } => frame.client_uuid = Some(client_id.clone()),
            Command::CreateJob { module_name } => frame.job_name = Some(module_name.clone()),
            Command::StopJob { job_id } => frame.job_id = Some(*job_id),
            Command::JobData { job_id, data } => {
                frame.job_id = Some(*job_id);
                frame.job_data = Some(data.clone());
            }
        }
        frame
    }

    /// Parse from a flat wire frame
    pub fn from_frame(mut frame: RawFrame) -> Result<Self, ProtocolError> {
        let tag = frame
            .cmd_id
            .ok_or_else(|| RawFrame::missing("cmd_id"))?;
        match tag {
            TAG_OK => Ok(Command::Ok),
            TAG_ERROR => Ok(Command::Error(frame.error_data.take().unwrap_or_default())),
            TAG_REGISTER => Ok(Command::Register {
                client_id: frame.take_client_uuid()?,
            }),
            TAG_CREATE_JOB => Ok(Command::CreateJob {
                module_name: frame.take_job_name()?,
            }),
            TAG_STOP_JOB => Ok(Command::StopJob {
                job_id: frame.take_job_id()?,
            }),
            TAG_JOB_DATA => Ok(Command::JobData {
                job_id: frame.take_job_id()?,
                data: frame.take_job_data()?,
            }),
            other => Err(ProtocolError::UnknownTag(other)),
        }
    }
}

impl Reply {
    /// The wire tag of this reply
    pub fn tag(&self) -> u8 {
        match self {
            Reply::Ok => TAG_OK,
            Reply::Error(_) => TAG_ERROR,
            Reply::Registered { .. } => TAG_REGISTER,
            Reply::JobCreated { .. } => TAG_CREATE_JOB,
            Reply::JobStopped { .. } => TAG_STOP_JOB,
            Reply::JobData { .. } => TAG_JOB_DATA,
        }
    }

    /// Convert into the flat wire frame
    pub fn to_frame(&self) -> RawFrame {
        let mut frame = RawFrame {
            rply_id: Some(self.tag()),
            ..Default::default()
        };
        match self {
            Reply::Ok => {}
            Reply::Error(message) => frame.error_data = Some(message.clone()),
            Reply::Registered { client_id } => frame.client_uuid = Some(client_id.clone()),
            Reply::JobCreated {
                job_id,
                module_name,
            } => {
                frame.job_id = Some(*job_id);
                frame.job_name = Some(module_name.clone());
            }
            Reply::JobStopped { job_id } => frame.job_id = Some(*job_id),
            Reply::JobData { job_id, data } => {
                frame.job_id = Some(*job_id);
                frame.job_data = Some(data.clone());
            }
        }
        frame
    }

    /// Parse from a flat wire frame
    pub fn from_frame(mut frame: RawFrame) -> Result<Self, ProtocolError> {
        let tag = frame
            .rply_id
            .ok_or_else(|| RawFrame::missing("rply_id"))?;
        match tag {
            TAG_OK => Ok(Reply::Ok),
            TAG_ERROR => Ok(Reply::Error(frame.error_data.take().unwrap_or_default())),
            TAG_REGISTER => Ok(Reply::Registered {
                client_id: frame.take_client_uuid()?,
            }),
            TAG_CREATE_JOB => Ok(Reply::JobCreated {
                job_id: frame.take_job_id()?,
                module_name: frame.take_job_name()?,
            }),
            TAG_STOP_JOB => Ok(Reply::JobStopped {
                job_id: frame.take_job_id()?,
            }),
            TAG_JOB_DATA => Ok(Reply::JobData {
                job_id: frame.take_job_id()?,
                data: frame.take_job_data()?,
            }),
            other => Err(ProtocolError::UnknownTag(other)),
        }
    }
}
