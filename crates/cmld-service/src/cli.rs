//! Command-line interface for the `cml-service` binary.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use cmld_core::{Connectivity, IdentityUpdate, ServiceConfig};

use crate::protocol::AgentMessage;

/// Log output format for CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CliLogFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// Structured JSON output.
    Json,
}

impl From<CliLogFormat> for cmld_core::LogFormat {
    fn from(fmt: CliLogFormat) -> Self {
        match fmt {
            CliLogFormat::Text => cmld_core::LogFormat::Text,
            CliLogFormat::Json => cmld_core::LogFormat::Json,
        }
    }
}

/// cml-service - container service channel between cmld and the companion agent.
#[derive(Debug, Parser)]
#[command(
    name = "cml-service",
    version,
    about = "Container service channel between cmld and the companion agent"
)]
pub struct Cli {
    /// Increase verbosity (can be repeated: -v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log to file instead of stderr
    #[arg(long = "log-file", value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,

    /// Log output format
    #[arg(long = "log-format", default_value = "text", global = true)]
    pub log_format: CliLogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Host the service socket for a standalone container
    Serve(ServeArgs),
    /// Connect as the companion agent and send one message
    Agent(AgentArgs),
}

/// Socket location shared by both subcommands.
#[derive(Debug, Args)]
pub struct SocketArgs {
    /// Directory of the service socket (default: $CML_SOCKET_DIR or /run/socket)
    #[arg(long = "socket-dir", value_name = "DIR")]
    pub socket_dir: Option<PathBuf>,

    /// File name of the service socket
    #[arg(long = "socket-name", value_name = "NAME")]
    pub socket_name: Option<String>,
}

impl SocketArgs {
    /// Build the service config, starting from the environment.
    pub fn service_config(&self) -> ServiceConfig {
        let mut config = ServiceConfig::from_env();
        if let Some(dir) = &self.socket_dir {
            config = config.with_socket_dir(dir);
        }
        if let Some(name) = &self.socket_name {
            config = config.with_socket_name(name);
        }
        config
    }
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    #[command(flatten)]
    pub socket: SocketArgs,

    /// Container name reported to the agent
    #[arg(long = "name", default_value = "standalone")]
    pub name: String,

    /// DNS server reported to the agent
    #[arg(long = "dns", value_name = "ADDR")]
    pub dns_server: Option<String>,

    /// listen(2) backlog
    #[arg(long = "backlog")]
    pub backlog: Option<i32>,

    /// Execute privileged time-setting requests from the agent
    #[arg(long = "allow-exec")]
    pub allow_exec: bool,

    /// Seconds to wait for the agent after SHUTDOWN was delivered
    #[arg(long = "stop-timeout", default_value = "5", value_name = "SECS")]
    pub stop_timeout: u64,
}

impl ServeArgs {
    pub fn service_config(&self) -> ServiceConfig {
        let config = self.socket.service_config();
        match self.backlog {
            Some(backlog) => config.with_listen_backlog(backlog),
            None => config,
        }
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout)
    }
}

/// Message kinds the agent subcommand can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AgentRequest {
    BootCompleted,
    AudioSuspendCompleted,
    AudioResumeCompleted,
    SuspendCompleted,
    ResumeCompleted,
    Shutdown,
    MasterClear,
    Connectivity,
    Identity,
    NameRequest,
    DnsRequest,
    Exec,
    AuditAck,
}

#[derive(Debug, Args)]
pub struct AgentArgs {
    #[command(flatten)]
    pub socket: SocketArgs,

    /// Message to send
    #[arg(value_enum)]
    pub request: AgentRequest,

    /// Connectivity for `connectivity` (offline, mobile, wifi, mobile+wifi)
    #[arg(long = "connectivity", value_parser = parse_connectivity)]
    pub connectivity: Option<Connectivity>,

    /// IMEI for `identity`
    #[arg(long = "imei")]
    pub imei: Option<String>,

    /// MAC address for `identity`
    #[arg(long = "mac")]
    pub mac: Option<String>,

    /// Phone number for `identity`
    #[arg(long = "phone-number")]
    pub phone_number: Option<String>,

    /// Executable for `exec`
    #[arg(long = "exec-path", value_name = "PATH")]
    pub exec_path: Option<String>,

    /// Argument for `exec` (repeatable)
    #[arg(long = "exec-arg", action = ArgAction::Append, value_name = "ARG", allow_hyphen_values = true)]
    pub exec_args: Vec<String>,

    /// Payload for `audit-ack`
    #[arg(long = "ack")]
    pub ack: Option<String>,

    /// Seconds to wait for a reply after sending (0 = do not wait)
    #[arg(long = "wait", default_value = "0", value_name = "SECS")]
    pub wait: u64,
}

impl AgentArgs {
    /// Build the message to send.
    pub fn message(&self) -> Result<AgentMessage, String> {
        Ok(match self.request {
            AgentRequest::BootCompleted => AgentMessage::BootCompleted,
            AgentRequest::AudioSuspendCompleted => AgentMessage::AudioSuspendCompleted,
            AgentRequest::AudioResumeCompleted => AgentMessage::AudioResumeCompleted,
            AgentRequest::SuspendCompleted => AgentMessage::SuspendCompleted,
            AgentRequest::ResumeCompleted => AgentMessage::ResumeCompleted,
            AgentRequest::Shutdown => AgentMessage::Shutdown,
            AgentRequest::MasterClear => AgentMessage::MasterClear,
            AgentRequest::Connectivity => AgentMessage::ConnectivityChange(
                self.connectivity
                    .ok_or("connectivity requires --connectivity")?,
            ),
            AgentRequest::Identity => {
                let update = IdentityUpdate {
                    imei: self.imei.clone(),
                    mac: self.mac.clone(),
                    phone_number: self.phone_number.clone(),
                };
                if update.is_empty() {
                    return Err("identity requires --imei, --mac or --phone-number".to_string());
                }
                AgentMessage::Identity(update)
            }
            AgentRequest::NameRequest => AgentMessage::ContainerCfgNameRequest,
            AgentRequest::DnsRequest => AgentMessage::ContainerCfgDnsRequest,
            AgentRequest::Exec => AgentMessage::ExecCapSystime {
                path: self.exec_path.clone().ok_or("exec requires --exec-path")?,
                params: self.exec_args.clone(),
            },
            AgentRequest::AuditAck => AgentMessage::AuditAck(
                self.ack
                    .clone()
                    .ok_or("audit-ack requires --ack")?
                    .into_bytes(),
            ),
        })
    }

    pub fn wait(&self) -> Option<Duration> {
        (self.wait > 0).then(|| Duration::from_secs(self.wait))
    }
}

fn parse_connectivity(s: &str) -> Result<Connectivity, String> {
    Connectivity::from_name(s).ok_or_else(|| {
        format!("invalid connectivity '{s}' (expected offline, mobile, wifi or mobile+wifi)")
    })
}
