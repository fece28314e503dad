#[macro_use] extern crate derivative;
#[macro_use] extern crate log;

mod internal;

pub mod client;
pub mod config;
pub mod external;
pub mod logger;
pub mod message;
pub mod participant;
pub mod round;
pub mod shared;
pub mod socket;
pub mod state;
pub mod thread;

pub use crate::client::{Client, ClientError, Command, CommandError};
pub use crate::config::{CoordinatorConfig, NodeConfig, Running};
pub use crate::message::{AbortReason, Message, Operation, ProposalId, Role};
pub use crate::state::{Response, State, Store};
pub use crate::thread::coordinator::Coordinator;
pub use crate::thread::node::{Handle, RequestError};
