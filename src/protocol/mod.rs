//! The spanning-tree protocol instance.
//!
//! [`SpanningTree`] is a sans-IO bidirectional state machine: the
//! lifecycle owner feeds it inbound lines and drains its outbound queue;
//! plugins call its outbound operations; hook consumers receive structured
//! events after each handled line. All mutable state sits behind one
//! writer-preferred lock, and each dispatched line or outbound operation
//! is a single atomic critical section. Hook delivery happens after the
//! critical section closes.

mod handlers;
mod outbound;

pub use outbound::{ClientSpec, ServerSpec};

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::config::LinkConfig;
use crate::error::{ProtocolError, Result};
use crate::hooks::{HookBus, HookEvent, Payload};
use crate::idgen::{SidGenerator, UidGenerator};
use crate::line::Line;
use crate::state::{now_ts, Network, Server};
use crate::vocab::{ModeClasses, ModeVocabulary};

/// The protocol revision we speak and the minimum we accept.
pub const PROTOCOL_VERSION: u32 = 1202;

/// Everything behind the lock.
pub(crate) struct Inner {
    pub config: LinkConfig,
    pub state: Network,
    pub vocab: ModeVocabulary,
    pub sidgen: SidGenerator,
    pub uidgen: HashMap<String, UidGenerator>,
    out: VecDeque<String>,
    pub connected: bool,
    pub last_pong: i64,
    pub maxnicklen: Option<usize>,
    pub maxchanlen: Option<usize>,
    pub start_ts: i64,
    /// Hooks queued by a handler for delivery ahead of its own payload.
    pub pending_hooks: Vec<HookEvent>,
}

impl Inner {
    /// Queue a raw line for the transport.
    pub fn send_raw(&mut self, line: impl Into<String>) {
        self.out.push_back(line.into());
    }

    /// Queue a line with a `:source` prefix.
    pub fn send_from(&mut self, source: &str, text: impl AsRef<str>) {
        self.out.push_back(format!(":{} {}", source, text.as_ref()));
    }

    /// Resolve the serving SID of one of our own pseudo-clients.
    pub fn internal_client(&self, uid: &str) -> Result<String> {
        self.state
            .internal_client_server(uid)
            .ok_or_else(|| ProtocolError::NotInternal(uid.to_string()))
    }

    /// Require `sid` to be one of our own pseudo-servers.
    pub fn internal_server(&self, sid: &str) -> Result<()> {
        if self.state.is_internal_server(sid) {
            Ok(())
        } else {
            Err(ProtocolError::NotInternal(sid.to_string()))
        }
    }

    /// Oper a client up. The dialect has no umode `+o` on the wire for
    /// this; a dedicated `OPERTYPE` line carries the oper type with
    /// underscores for spaces.
    pub fn oper_up(&mut self, target: &str, opertype: Option<&str>) -> Result<()> {
        let user = self.state.user_mut(target)?;
        let otype = opertype
            .map(str::to_string)
            .or_else(|| user.opertype.clone())
            .unwrap_or_else(|| "IRC Operator".to_string());
        user.opertype = Some(otype.clone());
        debug!(%target, opertype = %otype, "sending OPERTYPE");
        self.send_from(target, format!("OPERTYPE {}", otype.replace(' ', "_")));
        Ok(())
    }
}

type Handler = fn(&mut Inner, &str, &str, &[&str]) -> Result<Option<Payload>>;

fn dispatch_table() -> HashMap<&'static str, Handler> {
    let mut table: HashMap<&'static str, Handler> = HashMap::new();
    table.insert("FJOIN", handlers::fjoin);
    table.insert("UID", handlers::uid);
    table.insert("SERVER", handlers::server);
    table.insert("SQUIT", handlers::squit);
    table.insert("RSQUIT", handlers::squit);
    table.insert("FMODE", handlers::fmode);
    table.insert("MODE", handlers::mode);
    table.insert("FTOPIC", handlers::ftopic);
    table.insert("SVSTOPIC", handlers::ftopic);
    table.insert("TOPIC", handlers::topic);
    table.insert("INVITE", handlers::invite);
    table.insert("ENCAP", handlers::encap);
    table.insert("OPERTYPE", handlers::opertype);
    table.insert("FIDENT", handlers::fident);
    table.insert("FHOST", handlers::fhost);
    table.insert("FNAME", handlers::fname);
    table.insert("IDLE", handlers::idle);
    table.insert("PING", handlers::ping);
    table.insert("PONG", handlers::pong);
    table.insert("AWAY", handlers::away);
    table.insert("ENDBURST", handlers::endburst);
    table.insert("QUIT", handlers::quit);
    table.insert("KILL", handlers::kill);
    table.insert("NICK", handlers::nick);
    table.insert("PART", handlers::part);
    table.insert("KICK", handlers::kick);
    table
}

/// One linked pseudo-server.
pub struct SpanningTree {
    inner: RwLock<Inner>,
    hooks: HookBus,
    dispatch: HashMap<&'static str, Handler>,
    #[cfg(feature = "tokio")]
    outbound_ready: tokio::sync::Notify,
}

impl SpanningTree {
    /// Build an instance for the given link configuration.
    pub fn new(config: LinkConfig) -> Result<Self> {
        let sidgen = SidGenerator::new(&config.sid)?;
        let state = Network::new(&config.sid, &config.hostname, &config.serverdesc);
        Ok(SpanningTree {
            inner: RwLock::new(Inner {
                state,
                vocab: ModeVocabulary::default(),
                sidgen,
                uidgen: HashMap::new(),
                out: VecDeque::new(),
                connected: false,
                last_pong: 0,
                maxnicklen: None,
                maxchanlen: None,
                start_ts: now_ts(),
                pending_hooks: Vec::new(),
                config,
            }),
            hooks: HookBus::new(),
            dispatch: dispatch_table(),
            #[cfg(feature = "tokio")]
            outbound_ready: tokio::sync::Notify::new(),
        })
    }

    /// The hook bus, for registering consumers.
    pub fn hooks(&self) -> &HookBus {
        &self.hooks
    }

    /// Whether capability negotiation has completed.
    pub fn connected(&self) -> bool {
        self.inner.read().connected
    }

    /// Epoch seconds of the last PONG accepted from the uplink.
    pub fn last_pong(&self) -> i64 {
        self.inner.read().last_pong
    }

    /// Nick length limit advertised by the peer, once negotiated.
    pub fn max_nick_len(&self) -> Option<usize> {
        self.inner.read().maxnicklen
    }

    /// Run a closure against the current network state.
    pub fn with_state<R>(&self, f: impl FnOnce(&Network) -> R) -> R {
        f(&self.inner.read().state)
    }

    /// Drain every queued outbound line.
    pub fn take_outbound(&self) -> Vec<String> {
        self.inner.write().out.drain(..).collect()
    }

    /// Wait until at least one outbound line has been queued since the
    /// last drain.
    #[cfg(feature = "tokio")]
    pub async fn outbound_ready(&self) {
        self.outbound_ready.notified().await;
    }

    pub(crate) fn wake_writer(&self) {
        #[cfg(feature = "tokio")]
        self.outbound_ready.notify_one();
    }

    /// Open the link: capability exchange, our `SERVER` introduction, and
    /// an empty burst.
    pub fn connect(&self) {
        {
            let mut guard = self.inner.write();
            let inner = &mut *guard;
            let sid = inner.config.sid.clone();
            let start_ts = inner.start_ts;
            inner.send_raw(format!("CAPAB START {}", PROTOCOL_VERSION));
            inner.send_raw(format!("CAPAB CAPABILITIES :PROTOCOL={}", PROTOCOL_VERSION));
            inner.send_raw("CAPAB END");
            inner.send_raw(format!(
                "SERVER {} {} 0 {} :{}",
                inner.config.hostname, inner.config.sendpass, sid, inner.config.serverdesc
            ));
            inner.send_from(&sid, format!("BURST {}", start_ts));
            inner.send_from(&sid, "ENDBURST");
        }
        self.wake_writer();
    }

    /// Feed one inbound line through the dispatcher.
    ///
    /// Returns an error only for faults that must tear the link down;
    /// handler-level inconsistencies are logged and the line skipped, and
    /// unknown verbs are silently ignored.
    pub fn handle_line(&self, raw: &str) -> Result<()> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(());
        }

        let mut events = Vec::new();
        {
            let mut inner = self.inner.write();
            // Pre-registration traffic arrives without a source prefix and
            // bypasses the source/verb reshape.
            match trimmed.split(' ').next() {
                Some("SERVER") => {
                    let result = handle_uplink_intro(&mut inner, trimmed);
                    drop(inner);
                    self.wake_writer();
                    return result;
                }
                Some("CAPAB") => {
                    let result = handle_capab(&mut inner, trimmed);
                    drop(inner);
                    self.wake_writer();
                    return result;
                }
                _ => {}
            }

            let line = Line::parse(trimmed)?;
            let source = match line.source {
                Some(s) => s.to_string(),
                None => inner.state.uplink.clone().unwrap_or_default(),
            };
            let verb = line.verb.to_ascii_uppercase();
            let Some(handler) = self.dispatch.get(verb.as_str()) else {
                debug!(%verb, "ignoring unhandled command");
                return Ok(());
            };
            match handler(&mut inner, &source, &verb, &line.args) {
                Ok(result) => {
                    events.append(&mut inner.pending_hooks);
                    if let Some(payload) = result {
                        events.push(HookEvent { source, command: verb, payload });
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(%verb, error = %e, "skipping line");
                    inner.pending_hooks.clear();
                }
            }
        }

        self.wake_writer();
        for event in events {
            self.hooks.dispatch(event);
        }
        Ok(())
    }
}

/// `SERVER <name> <pass> 0 <sid> :<desc>` from the uplink: password check
/// and registration of the network root.
fn handle_uplink_intro(inner: &mut Inner, raw: &str) -> Result<()> {
    let line = Line::parse(raw)?;
    if line.args.len() < 5 {
        return Err(ProtocolError::InvalidLine(raw.to_string()));
    }
    let name = line.args[0].to_lowercase();
    let password = line.args[1];
    let sid = line.args[3].to_string();
    let description = *line.args.last().expect("arity checked");

    if password != inner.config.recvpass {
        return Err(ProtocolError::AuthFailure(format!(
            "recvpass from uplink {} does not match configuration",
            name
        )));
    }

    inner.state.servers.insert(
        sid.clone(),
        Server {
            sid: sid.clone(),
            name,
            description: description.to_string(),
            uplink: None,
            internal: false,
            users: Default::default(),
        },
    );
    // Our pseudo-server now hangs off the peer; the peer is the one
    // server in the tree without an uplink.
    let our_sid = inner.state.sid.clone();
    if let Some(local) = inner.state.servers.get_mut(&our_sid) {
        local.uplink = Some(sid.clone());
    }
    inner.state.uplink = Some(sid);
    Ok(())
}

/// Capability negotiation. `CHANMODES`/`USERMODES` populate the symbolic
/// vocabulary; `CAPABILITIES` carries the class partitions, limits, the
/// prefix table, and the peer's protocol version.
fn handle_capab(inner: &mut Inner, raw: &str) -> Result<()> {
    let line = Line::parse(raw)?;
    // The advertisement body may arrive as one trailing argument or as
    // bare tokens; either way it is one space-separated list.
    let body = || line.args.get(1..).unwrap_or(&[]).join(" ");
    match line.arg(0) {
        Some("CHANMODES") => inner.vocab.learn_cmodes(&body()),
        Some("USERMODES") => inner.vocab.learn_umodes(&body()),
        Some("CAPABILITIES") => {
            for token in body().split_whitespace() {
                let Some((key, value)) = token.split_once('=') else {
                    continue;
                };
                match key {
                    "PROTOCOL" => {
                        let got: u32 = value.parse().map_err(|_| {
                            ProtocolError::InvalidLine(raw.to_string())
                        })?;
                        if got < PROTOCOL_VERSION {
                            return Err(ProtocolError::ProtocolTooOld {
                                got,
                                min: PROTOCOL_VERSION,
                            });
                        }
                        // The vocabulary is only trustworthy once the
                        // capability block has been ingested.
                        inner.connected = true;
                    }
                    "NICKMAX" => inner.maxnicklen = value.parse().ok(),
                    "CHANMAX" => inner.maxchanlen = value.parse().ok(),
                    "CHANMODES" => {
                        if let Some(classes) = ModeClasses::parse(value) {
                            inner.vocab.cmode_classes = classes;
                        }
                    }
                    "USERMODES" => {
                        if let Some(classes) = ModeClasses::parse(value) {
                            inner.vocab.umode_classes = classes;
                        }
                    }
                    "PREFIX" => {
                        if inner.vocab.learn_prefixes(value).is_none() {
                            warn!(prefix = %value, "unparseable PREFIX capability");
                        }
                    }
                    _ => {}
                }
            }
        }
        // START and END carry nothing we use.
        _ => {}
    }
    Ok(())
}
