//! Protocol codec and typed message catalog for the service channel.
//!
//! The wire format is:
//!
//! - Length prefix: u32 big-endian (4 bytes)
//! - Payload: protobuf-encoded `CmldToServiceMessage` or `ServiceToCmldMessage`
//!
//! The protobuf types carry a numeric `code` plus optional fields. This
//! module turns them into one Rust enum per direction so that handlers
//! match exhaustively on message kinds:
//!
//! - [`CmldMessage`]: cmld -> companion agent
//! - [`AgentMessage`]: companion agent -> cmld
//!
//! Codes the schema does not know decode to [`ProtocolError::UnknownCode`];
//! callers log and skip those rather than treating them as framing errors.
//! A message without any code is [`ProtocolError::MissingCode`], which is
//! a decode failure like undecodable bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::Message as ProstMessage;
use thiserror::Error;

use cmld_core::constants::FRAME_HEADER_LEN;
use cmld_core::{Connectivity, IdentityUpdate};

use crate::proto::{
    self, ContainerConnectivity, cmld_to_service_message, service_to_cmld_message,
};

/// Errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame larger than the configured maximum.
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Protobuf decode error.
    #[error("decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// The message code is not part of the catalog.
    #[error("unknown message code {0}")]
    UnknownCode(i32),

    /// The message carries no code at all.
    #[error("message has no code")]
    MissingCode,

    /// A field required by the message kind is absent.
    #[error("missing field '{0}'")]
    MissingField(&'static str),

    /// A field holds a value outside its enum.
    #[error("invalid value {value} for field '{field}'")]
    InvalidField { field: &'static str, value: i32 },
}

impl ProtocolError {
    /// Returns true if the frame itself was fine but its content is not
    /// understood. Such messages are skipped, the connection stays open.
    pub fn is_unrecognized(&self) -> bool {
        matches!(
            self,
            ProtocolError::UnknownCode(_)
                | ProtocolError::MissingField(_)
                | ProtocolError::InvalidField { .. }
        )
    }
}

impl From<ProtocolError> for cmld_core::Error {
    fn from(e: ProtocolError) -> Self {
        cmld_core::Error::Decode {
            message: e.to_string(),
        }
    }
}

// ============================================================================
// Framing
// ============================================================================

/// Frame an already-encoded protobuf payload.
pub fn encode_frame(payload: &[u8], max_size: usize) -> Result<Bytes, ProtocolError> {
    if payload.len() > max_size {
        return Err(ProtocolError::MessageTooLarge {
            size: payload.len(),
            max: max_size,
        });
    }

    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);

    Ok(buf.freeze())
}

/// Encode and frame a protobuf message.
pub fn encode_message<M: ProstMessage>(msg: &M, max_size: usize) -> Result<Bytes, ProtocolError> {
    encode_frame(&msg.encode_to_vec(), max_size)
}

/// Try to split one frame off the front of `buf`.
///
/// Returns:
/// - Ok(Some(payload)) if a complete frame was available (buffer is advanced)
/// - Ok(None) if more data is needed (buffer unchanged)
/// - Err if the announced length exceeds `max_size`
pub fn try_decode_frame(buf: &mut BytesMut, max_size: usize) -> Result<Option<Bytes>, ProtocolError> {
    if buf.len() < FRAME_HEADER_LEN {
        return Ok(None);
    }

    // Peek the length without consuming
    let len = (&buf[..FRAME_HEADER_LEN]).get_u32() as usize;
    if len > max_size {
        return Err(ProtocolError::MessageTooLarge {
            size: len,
            max: max_size,
        });
    }

    if buf.len() < FRAME_HEADER_LEN + len {
        return Ok(None);
    }

    buf.advance(FRAME_HEADER_LEN);
    Ok(Some(buf.split_to(len).freeze()))
}

// ============================================================================
// Connectivity conversion
// ============================================================================

impl From<Connectivity> for ContainerConnectivity {
    fn from(c: Connectivity) -> Self {
        match c {
            Connectivity::Offline => ContainerConnectivity::Offline,
            Connectivity::MobileOnly => ContainerConnectivity::MobileOnly,
            Connectivity::WifiOnly => ContainerConnectivity::WifiOnly,
            Connectivity::MobileAndWifi => ContainerConnectivity::MobileAndWifi,
        }
    }
}

impl From<ContainerConnectivity> for Connectivity {
    fn from(c: ContainerConnectivity) -> Self {
        match c {
            ContainerConnectivity::Offline => Connectivity::Offline,
            ContainerConnectivity::MobileOnly => Connectivity::MobileOnly,
            ContainerConnectivity::WifiOnly => Connectivity::WifiOnly,
            ContainerConnectivity::MobileAndWifi => Connectivity::MobileAndWifi,
        }
    }
}

fn connectivity_from_wire(value: Option<i32>) -> Result<Connectivity, ProtocolError> {
    let value = value.ok_or(ProtocolError::MissingField("connectivity"))?;
    ContainerConnectivity::try_from(value)
        .map(Connectivity::from)
        .map_err(|_| ProtocolError::InvalidField {
            field: "connectivity",
            value,
        })
}

fn connectivity_to_wire(c: Connectivity) -> Option<i32> {
    Some(ContainerConnectivity::from(c) as i32)
}

// ============================================================================
// cmld -> agent
// ============================================================================

/// Simple command kinds cmld sends without a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceCommand {
    Shutdown,
    Suspend,
    Resume,
    AudioSuspend,
    AudioResume,
    AuditComplete,
}

impl ServiceCommand {
    /// The message carrying this command, or `None` if the command is
    /// currently not sent at all.
    pub fn message(&self) -> Option<CmldMessage> {
        match self {
            ServiceCommand::Shutdown => Some(CmldMessage::Shutdown),
            ServiceCommand::Suspend => Some(CmldMessage::Suspend),
            ServiceCommand::Resume => Some(CmldMessage::Resume),
            ServiceCommand::AudioSuspend => Some(CmldMessage::AudioSuspend),
            // The agent does not implement audio resume yet
            ServiceCommand::AudioResume => None,
            ServiceCommand::AuditComplete => Some(CmldMessage::AuditComplete),
        }
    }
}

impl std::fmt::Display for ServiceCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceCommand::Shutdown => write!(f, "shutdown"),
            ServiceCommand::Suspend => write!(f, "suspend"),
            ServiceCommand::Resume => write!(f, "resume"),
            ServiceCommand::AudioSuspend => write!(f, "audio_suspend"),
            ServiceCommand::AudioResume => write!(f, "audio_resume"),
            ServiceCommand::AuditComplete => write!(f, "audit_complete"),
        }
    }
}

/// Messages sent from cmld to the companion agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CmldMessage {
    Shutdown,
    Suspend,
    Resume,
    AudioSuspend,
    AudioResume,
    ConnectivityChange(Connectivity),
    ContainerCfgName(String),
    ContainerCfgDns(Option<String>),
    AuditRecord(Vec<u8>),
    AuditComplete,
    AuditNotify { remaining_storage: u64 },
}

impl CmldMessage {
    /// Protobuf code of this message.
    pub fn code(&self) -> cmld_to_service_message::Code {
        use cmld_to_service_message::Code;
        match self {
            CmldMessage::Shutdown => Code::Shutdown,
            CmldMessage::Suspend => Code::Suspend,
            CmldMessage::Resume => Code::Resume,
            CmldMessage::AudioSuspend => Code::AudioSuspend,
            CmldMessage::AudioResume => Code::AudioResume,
            CmldMessage::ConnectivityChange(_) => Code::ConnectivityChange,
            CmldMessage::ContainerCfgName(_) => Code::ContainerCfgName,
            CmldMessage::ContainerCfgDns(_) => Code::ContainerCfgDns,
            CmldMessage::AuditRecord(_) => Code::AuditRecord,
            CmldMessage::AuditComplete => Code::AuditComplete,
            CmldMessage::AuditNotify { .. } => Code::AuditNotify,
        }
    }

    /// Build the protobuf message.
    pub fn to_proto(&self) -> proto::CmldToServiceMessage {
        let mut msg = proto::CmldToServiceMessage {
            code: Some(self.code() as i32),
            ..Default::default()
        };
        match self {
            CmldMessage::ConnectivityChange(c) => msg.connectivity = connectivity_to_wire(*c),
            CmldMessage::ContainerCfgName(name) => msg.container_cfg_name = Some(name.clone()),
            CmldMessage::ContainerCfgDns(dns) => msg.container_cfg_dns = dns.clone(),
            CmldMessage::AuditRecord(record) => msg.audit_record = Some(record.clone()),
            CmldMessage::AuditNotify { remaining_storage } => {
                msg.audit_remaining_storage = Some(*remaining_storage)
            }
            CmldMessage::Shutdown
            | CmldMessage::Suspend
            | CmldMessage::Resume
            | CmldMessage::AudioSuspend
            | CmldMessage::AudioResume
            | CmldMessage::AuditComplete => {}
        }
        msg
    }

    /// Unframed protobuf encoding, as handed to the audit bridge for
    /// pre-packed records.
    pub fn encode_payload(&self) -> Vec<u8> {
        self.to_proto().encode_to_vec()
    }

    /// Decode an unframed payload.
    pub fn decode_payload(payload: &[u8]) -> Result<Self, ProtocolError> {
        Self::try_from(proto::CmldToServiceMessage::decode(payload)?)
    }
}

impl TryFrom<proto::CmldToServiceMessage> for CmldMessage {
    type Error = ProtocolError;

    fn try_from(msg: proto::CmldToServiceMessage) -> Result<Self, Self::Error> {
        use cmld_to_service_message::Code;
        let raw = msg.code.ok_or(ProtocolError::MissingCode)?;
        let code = Code::try_from(raw).map_err(|_| ProtocolError::UnknownCode(raw))?;
        Ok(match code {
            Code::Shutdown => CmldMessage::Shutdown,
            Code::Suspend => CmldMessage::Suspend,
            Code::Resume => CmldMessage::Resume,
            Code::AudioSuspend => CmldMessage::AudioSuspend,
            Code::AudioResume => CmldMessage::AudioResume,
            Code::ConnectivityChange => {
                CmldMessage::ConnectivityChange(connectivity_from_wire(msg.connectivity)?)
            }
            Code::ContainerCfgName => CmldMessage::ContainerCfgName(
                msg.container_cfg_name
                    .ok_or(ProtocolError::MissingField("container_cfg_name"))?,
            ),
            Code::ContainerCfgDns => CmldMessage::ContainerCfgDns(msg.container_cfg_dns),
            Code::AuditRecord => CmldMessage::AuditRecord(
                msg.audit_record
                    .ok_or(ProtocolError::MissingField("audit_record"))?,
            ),
            Code::AuditComplete => CmldMessage::AuditComplete,
            Code::AuditNotify => CmldMessage::AuditNotify {
                remaining_storage: msg
                    .audit_remaining_storage
                    .ok_or(ProtocolError::MissingField("audit_remaining_storage"))?,
            },
        })
    }
}

// ============================================================================
// agent -> cmld
// ============================================================================

/// Messages sent from the companion agent to cmld.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentMessage {
    BootCompleted,
    AudioSuspendCompleted,
    AudioResumeCompleted,
    SuspendCompleted,
    ResumeCompleted,
    Shutdown,
    MasterClear,
    ConnectivityChange(Connectivity),
    Identity(IdentityUpdate),
    ContainerCfgNameRequest,
    ContainerCfgDnsRequest,
    ExecCapSystime { path: String, params: Vec<String> },
    AuditAck(Vec<u8>),
}

impl AgentMessage {
    /// Protobuf code of this message.
    pub fn code(&self) -> service_to_cmld_message::Code {
        use service_to_cmld_message::Code;
        match self {
            AgentMessage::BootCompleted => Code::BootCompleted,
            AgentMessage::AudioSuspendCompleted => Code::AudioSuspendCompleted,
            AgentMessage::AudioResumeCompleted => Code::AudioResumeCompleted,
            AgentMessage::SuspendCompleted => Code::SuspendCompleted,
            AgentMessage::ResumeCompleted => Code::ResumeCompleted,
            AgentMessage::Shutdown => Code::Shutdown,
            AgentMessage::MasterClear => Code::MasterClear,
            AgentMessage::ConnectivityChange(_) => Code::ConnectivityChange,
            AgentMessage::Identity(_) => Code::ImeiMacPhoneno,
            AgentMessage::ContainerCfgNameRequest => Code::ContainerCfgNameReq,
            AgentMessage::ContainerCfgDnsRequest => Code::ContainerCfgDnsReq,
            AgentMessage::ExecCapSystime { .. } => Code::ExecCapSystimePriv,
            AgentMessage::AuditAck(_) => Code::AuditAck,
        }
    }

    /// Build the protobuf message.
    pub fn to_proto(&self) -> proto::ServiceToCmldMessage {
        let mut msg = proto::ServiceToCmldMessage {
            code: Some(self.code() as i32),
            ..Default::default()
        };
        match self {
            AgentMessage::ConnectivityChange(c) => msg.connectivity = connectivity_to_wire(*c),
            AgentMessage::Identity(update) => {
                msg.imei = update.imei.clone();
                msg.mac = update.mac.clone();
                msg.phonenumber = update.phone_number.clone();
            }
            AgentMessage::ExecCapSystime { path, params } => {
                msg.captime_exec_path = Some(path.clone());
                msg.captime_exec_param = params.clone();
            }
            AgentMessage::AuditAck(ack) => msg.audit_ack = Some(ack.clone()),
            AgentMessage::BootCompleted
            | AgentMessage::AudioSuspendCompleted
            | AgentMessage::AudioResumeCompleted
            | AgentMessage::SuspendCompleted
            | AgentMessage::ResumeCompleted
            | AgentMessage::Shutdown
            | AgentMessage::MasterClear
            | AgentMessage::ContainerCfgNameRequest
            | AgentMessage::ContainerCfgDnsRequest => {}
        }
        msg
    }

    /// Decode an unframed payload.
    pub fn decode_payload(payload: &[u8]) -> Result<Self, ProtocolError> {
        Self::try_from(proto::ServiceToCmldMessage::decode(payload)?)
    }
}

impl TryFrom<proto::ServiceToCmldMessage> for AgentMessage {
    type Error = ProtocolError;

    fn try_from(msg: proto::ServiceToCmldMessage) -> Result<Self, Self::Error> {
        use service_to_cmld_message::Code;
        let raw = msg.code.ok_or(ProtocolError::MissingCode)?;
        let code = Code::try_from(raw).map_err(|_| ProtocolError::UnknownCode(raw))?;
        Ok(match code {
            Code::BootCompleted => AgentMessage::BootCompleted,
            Code::AudioSuspendCompleted => AgentMessage::AudioSuspendCompleted,
            Code::AudioResumeCompleted => AgentMessage::AudioResumeCompleted,
            Code::SuspendCompleted => AgentMessage::SuspendCompleted,
            Code::ResumeCompleted => AgentMessage::ResumeCompleted,
            Code::Shutdown => AgentMessage::Shutdown,
            Code::MasterClear => AgentMessage::MasterClear,
            Code::ConnectivityChange => {
                AgentMessage::ConnectivityChange(connectivity_from_wire(msg.connectivity)?)
            }
            Code::ImeiMacPhoneno => AgentMessage::Identity(IdentityUpdate {
                imei: msg.imei,
                mac: msg.mac,
                phone_number: msg.phonenumber,
            }),
            Code::ContainerCfgNameReq => AgentMessage::ContainerCfgNameRequest,
            Code::ContainerCfgDnsReq => AgentMessage::ContainerCfgDnsRequest,
            Code::ExecCapSystimePriv => AgentMessage::ExecCapSystime {
                path: msg
                    .captime_exec_path
                    .ok_or(ProtocolError::MissingField("captime_exec_path"))?,
                params: msg.captime_exec_param,
            },
            Code::AuditAck => AgentMessage::AuditAck(
                msg.audit_ack.ok_or(ProtocolError::MissingField("audit_ack"))?,
            ),
        })
    }
}
