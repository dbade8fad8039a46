//! The wire protocol layer: frame codec, reply decoders, and the request
//! descriptor type shared by every other component.

pub mod command;
pub mod decode;
pub mod resp;

pub use command::{Command, Role, RouteKey};
pub use resp::{RespCodec, RespFrame};
