//! Host command/response protocol
//!
//! In host mode the board delivers each complete received message to
//! [`HostProtocol::handle`] and forwards whatever it writes back to the host.
//!
//! # Wire format
//!
//! Commands (one per message, ASCII):
//!
//! ```text
//! $SET-ID 01234                  five digits, 00000..65533
//! $SET-RTC 24-05-01-12-30-00     YY-MM-DD-HH-mm-ss
//! $LOAD-INFO
//! $LOAD-LIST
//! $LOAD-ALL
//! $LOAD-ONE <len> <name>
//! $DELETE-ALL
//! $DELETE-ONE <len> <name>
//! ```
//!
//! Responses:
//!
//! ```text
//! SET-ID / SET-RTC / DELETE-*   $OK
//! LOAD-INFO                     <id> <total> <free> <sector size> YY-MM-DD-HH-mm-ss$OK
//! LOAD-LIST                     ($FILE-ENTRY <size> <name>)* $OK
//! LOAD-ALL                      ($FILE-ENTRY <size> <name> <bytes>$FILE-END)* $OK
//! LOAD-ONE                      $FILE-START <size> <bytes>$FILE-END
//! any failure                   $ERROR
//! ```
//!
//! Responses are written back to back with no line terminators. A failure
//! in the middle of a transfer appends `$ERROR` after the bytes already sent.

pub mod command;
mod handler;
pub mod response;

pub use command::{Command, ParseError, PREFIX};
pub use handler::{HostProtocol, ProtocolError};
