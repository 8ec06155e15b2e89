//! # slink-proto
//!
//! An IRC services pseudo-server core for the InspIRCd spanning-tree
//! server-to-server dialect (a TS6-family protocol). The crate links to a
//! network as if it were a full IRC server and keeps an authoritative
//! local replica of the network's users, channels, and servers, letting
//! plugins introduce pseudo-clients and act on the network through a
//! narrow operation surface.
//!
//! ## Features
//!
//! - Line tokenizing and dispatch for the spanning-tree wire grammar
//! - Capability-driven mode vocabulary (named modes, A/B/C/D classes,
//!   status prefixes)
//! - TS-based channel reconciliation
//! - SID/UID allocation for spawned pseudo-servers and pseudo-clients
//! - Structured hook fan-out to downstream consumers
//! - Optional Tokio transport and link driver (feature `tokio`, default)
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use slink_proto::{ClientSpec, LinkConfig, SpanningTree};
//!
//! # fn main() -> slink_proto::error::Result<()> {
//! let config = LinkConfig::from_toml_str(r#"
//!     sid = "0AL"
//!     hostname = "services.example.net"
//!     sendpass = "hunter2"
//!     recvpass = "hunter3"
//!     serverdesc = "network services"
//! "#)?;
//!
//! let proto = Arc::new(SpanningTree::new(config)?);
//! proto.hooks().subscribe(Arc::new(|event: &slink_proto::HookEvent| {
//!     println!("{} {} {:?}", event.source, event.command, event.payload);
//! }));
//!
//! // Fed by the lifecycle owner:
//! proto.handle_line(":70M FJOIN #chat 1423790411 +nt :o,70MAAAAAA")?;
//!
//! // Driven by plugins:
//! let bot = proto.spawn_client(ClientSpec::new("services"))?;
//! proto.join_client(&bot.uid, "#chat")?;
//! # Ok(())
//! # }
//! ```

#![deny(clippy::all)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod casemap;
pub mod config;
pub mod error;
pub mod hooks;
pub mod idgen;
pub mod line;
pub mod modes;
pub mod protocol;
pub mod state;
pub mod validate;
pub mod vocab;

pub use self::casemap::{irc_eq, irc_to_lower};
pub use self::config::LinkConfig;
pub use self::error::ProtocolError;
pub use self::hooks::{HookBus, HookConsumer, HookEvent, Payload};
pub use self::idgen::{SidGenerator, UidGenerator};
pub use self::line::Line;
pub use self::modes::{join_modes, parse_modes, ModeChange, ModePair, ModeSign, ModeTarget};
pub use self::protocol::{ClientSpec, ServerSpec, SpanningTree, PROTOCOL_VERSION};
pub use self::state::{Channel, Network, Server, User};
pub use self::vocab::{ModeClass, ModeClasses, ModeVocabulary};

#[cfg(feature = "tokio")]
pub mod link;
#[cfg(feature = "tokio")]
pub mod transport;
#[cfg(feature = "tokio")]
pub use self::transport::{Transport, TransportReadError, MAX_LINE_LEN};
