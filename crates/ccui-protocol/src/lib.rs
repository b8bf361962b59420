//! CCUI Protocol - Wire schemas for the claude-code-ui daemon
//!
//! This crate provides the schema layer between dynamic JSON and the
//! typed domain:
//! - `transcript` - decoding agent conversation-log lines
//! - `stream` - change records on the session stream
//! - `terminal` - daemon <-> browser terminal WebSocket messages
//! - `api` - HTTP facade request/response bodies

pub mod api;
pub mod stream;
pub mod terminal;
pub mod transcript;

pub use api::{
    CreateLauncherRequest, CreateLauncherResponse, CreateTerminalRequest, CreateTerminalResponse,
    FocusAction, FocusOrOpenRequest, FocusOrOpenResponse, FocusRequest, MachineInfo,
    MachinesResponse, MountStatus, OpenSessionRequest, SuccessResponse, TerminalInfo,
    TerminalsResponse,
};
pub use stream::{ChangeOp, ChangeRecord, NotificationKind, StatusNotification};
pub use terminal::{TerminalClientMessage, TerminalServerMessage};
pub use transcript::{RawTranscriptLine, SessionMeta};
