//! Outbound operations: the surface plugins drive the network with.
//!
//! Every operation validates that its source is one of our own
//! pseudo-clients or pseudo-servers, mutates the network state, then
//! queues the wire line. Failures report to the caller without touching
//! state or the wire.

use serde_json::json;

use crate::casemap::irc_to_lower;
use crate::error::{ProtocolError, Result};
use crate::idgen::UidGenerator;
use crate::modes::{join_modes, ModeChange, ModePair, ModeSign};
use crate::state::{now_ts, Server, User};
use crate::validate::is_server_name;

use super::{Inner, SpanningTree};

/// Parameters for [`SpanningTree::spawn_client`]. Only the nick is
/// required; everything else has the dialect's customary defaults.
#[derive(Debug, Clone)]
pub struct ClientSpec {
    pub nick: String,
    pub ident: String,
    pub host: String,
    /// Real (un-cloaked) host; defaults to `host`.
    pub realhost: Option<String>,
    pub modes: Vec<ModePair>,
    /// Serving SID; defaults to the main pseudo-server.
    pub server: Option<String>,
    pub ip: String,
    pub realname: Option<String>,
    pub ts: Option<i64>,
    pub opertype: Option<String>,
    pub manipulatable: bool,
}

impl ClientSpec {
    pub fn new(nick: impl Into<String>) -> Self {
        ClientSpec {
            nick: nick.into(),
            ident: "null".to_string(),
            host: "null".to_string(),
            realhost: None,
            modes: Vec::new(),
            server: None,
            ip: "0.0.0.0".to_string(),
            realname: None,
            ts: None,
            opertype: None,
            manipulatable: false,
        }
    }
}

/// Parameters for [`SpanningTree::spawn_server`].
#[derive(Debug, Clone)]
pub struct ServerSpec {
    pub name: String,
    /// Auto-allocated when absent.
    pub sid: Option<String>,
    /// Defaults to the main pseudo-server.
    pub uplink: Option<String>,
    /// Defaults to the configured server description.
    pub desc: Option<String>,
}

impl ServerSpec {
    pub fn new(name: impl Into<String>) -> Self {
        ServerSpec { name: name.into(), sid: None, uplink: None, desc: None }
    }
}

impl SpanningTree {
    /// Introduce a new pseudo-client and return a snapshot of its record.
    ///
    /// No nick collision or validity checks happen here; that is the
    /// caller's contract, as it is for every client this dialect bursts.
    pub fn spawn_client(&self, spec: ClientSpec) -> Result<User> {
        let snapshot = {
            let mut inner = self.inner.write();
            let server = spec.server.clone().unwrap_or_else(|| inner.state.sid.clone());
            inner.internal_server(&server)?;

            let uid = inner
                .uidgen
                .entry(server.clone())
                .or_insert_with(|| UidGenerator::new(&server))
                .next_uid()?;
            let ts = spec.ts.unwrap_or_else(now_ts);
            let realname = spec.realname.clone().unwrap_or_else(|| inner.config.realname.clone());
            let realhost = spec.realhost.clone().unwrap_or_else(|| spec.host.clone());
            let changes: Vec<ModeChange> = spec.modes.iter().map(ModeChange::from).collect();

            let mut user = User::new(&uid, &spec.nick, ts);
            user.ident = spec.ident.clone();
            user.host = spec.host.clone();
            user.realhost = realhost.clone();
            user.ip = spec.ip.clone();
            user.realname = realname.clone();
            user.manipulatable = spec.manipulatable;
            inner.state.add_user(user)?;
            inner.state.apply_user_modes(&uid, &changes)?;

            inner.send_from(
                &server,
                format!(
                    "UID {uid} {ts} {nick} {realhost} {host} {ident} {ip} {ts} {modes} + :{realname}",
                    uid = uid,
                    ts = ts,
                    nick = spec.nick,
                    realhost = realhost,
                    host = spec.host,
                    ident = spec.ident,
                    ip = spec.ip,
                    modes = join_modes(&changes),
                    realname = realname,
                ),
            );
            if spec.modes.iter().any(|(letter, _)| *letter == 'o') {
                inner.oper_up(&uid, spec.opertype.as_deref())?;
            }
            inner.state.user(&uid)?.clone()
        };
        self.wake_writer();
        Ok(snapshot)
    }

    /// Introduce a new pseudo-server behind one of ours and return its SID.
    pub fn spawn_server(&self, spec: ServerSpec) -> Result<String> {
        let sid = {
            let mut inner = self.inner.write();
            let uplink = spec.uplink.clone().unwrap_or_else(|| inner.state.sid.clone());
            let name = spec.name.to_lowercase();
            let desc = spec
                .desc
                .clone()
                .unwrap_or_else(|| inner.config.serverdesc.clone());
            let sid = match spec.sid.clone() {
                Some(sid) => sid,
                None => inner.sidgen.next_sid()?,
            };
            if sid.len() != 3 {
                return Err(ProtocolError::InvalidArgument(format!("bad SID length {:?}", sid)));
            }
            if inner.state.servers.contains_key(&sid) {
                return Err(ProtocolError::InvalidArgument(format!(
                    "a server with SID {} already exists",
                    sid
                )));
            }
            if inner.state.servers.values().any(|s| s.name == name) {
                return Err(ProtocolError::InvalidArgument(format!(
                    "a server named {} already exists",
                    name
                )));
            }
            inner.internal_server(&uplink)?;
            if !is_server_name(&name) {
                return Err(ProtocolError::InvalidArgument(format!(
                    "invalid server name {:?}",
                    name
                )));
            }

            inner.send_from(&uplink, format!("SERVER {} * 1 {} :{}", name, sid, desc));
            inner.state.servers.insert(
                sid.clone(),
                Server {
                    sid: sid.clone(),
                    name,
                    description: desc,
                    uplink: Some(uplink),
                    internal: true,
                    users: Default::default(),
                },
            );
            inner.send_from(&sid, "ENDBURST");
            sid
        };
        self.wake_writer();
        Ok(sid)
    }

    /// Join one of our clients to a channel.
    ///
    /// Bursts and ordinary joins look the same in this dialect: an FJOIN
    /// from the serving server on the client's behalf. List modes never
    /// appear in the mode segment.
    pub fn join_client(&self, client: &str, channel: &str) -> Result<()> {
        {
            let mut inner = self.inner.write();
            let server = inner.internal_client(client)?;
            let key = irc_to_lower(channel);
            let (ts, modestr) = {
                let vocab = &inner.vocab;
                let chan = inner.state.channels.get(&key);
                let ts = chan.map(|c| c.ts);
                let kept: Vec<ModeChange> = chan
                    .map(|c| {
                        c.modes
                            .iter()
                            .filter(|(letter, _)| !vocab.is_list_mode(*letter))
                            .map(ModeChange::from)
                            .collect()
                    })
                    .unwrap_or_default();
                (ts, join_modes(&kept))
            };
            let ts = match ts {
                Some(ts) => ts,
                None => inner.state.channel_entry(&key).ts,
            };
            inner.send_from(&server, format!("FJOIN {} {} {} :,{}", key, ts, modestr, client));
            inner.state.join_channel(client, &key);
        }
        self.wake_writer();
        Ok(())
    }

    /// Burst a list of `(prefixes, uid)` members into a channel from one
    /// of our servers, reconciling the channel TS first.
    pub fn sjoin_server(
        &self,
        server: Option<&str>,
        channel: &str,
        users: &[(String, String)],
        ts: Option<i64>,
    ) -> Result<()> {
        if users.is_empty() {
            return Err(ProtocolError::InvalidArgument("sjoin with no users".into()));
        }
        {
            let mut guard = self.inner.write();
            let inner = &mut *guard;
            let sid = server
                .map(str::to_string)
                .unwrap_or_else(|| inner.state.sid.clone());
            inner.internal_server(&sid)?;
            let key = irc_to_lower(channel);

            let orig_ts = inner.state.channel_entry(&key).ts;
            let ts = ts.unwrap_or(orig_ts);
            inner.state.update_ts(&inner.vocab, &key, ts);

            let kept: Vec<ModeChange> = {
                let vocab = &inner.vocab;
                inner.state.channels[&key]
                    .modes
                    .iter()
                    .filter(|(letter, _)| !vocab.is_list_mode(*letter))
                    .map(ModeChange::from)
                    .collect()
            };

            let mut namelist = Vec::with_capacity(users.len());
            let mut prefix_changes = Vec::new();
            for (prefixes, uid) in users {
                namelist.push(format!("{},{}", prefixes, uid));
                for letter in prefixes.chars() {
                    prefix_changes.push(ModeChange::add(letter, Some(uid.clone())));
                }
                inner.state.join_channel(uid, &key);
            }
            // Our prefix modes only enter channel state when our TS wins
            // or ties; the FJOIN itself is sent either way.
            if ts <= orig_ts {
                inner
                    .state
                    .apply_channel_modes(&inner.vocab, &key, &prefix_changes);
            }
            inner.send_from(
                &sid,
                format!("FJOIN {} {} {} :{}", key, ts, join_modes(&kept), namelist.join(" ")),
            );
        }
        self.wake_writer();
        Ok(())
    }

    /// Send mode changes from one of our clients.
    pub fn mode_client(
        &self,
        source: &str,
        target: &str,
        changes: &[ModeChange],
        ts: Option<i64>,
    ) -> Result<()> {
        {
            let mut inner = self.inner.write();
            inner.internal_client(source)?;
            send_modes(&mut inner, source, target, changes, ts)?;
        }
        self.wake_writer();
        Ok(())
    }

    /// Send mode changes from one of our servers.
    pub fn mode_server(
        &self,
        source: &str,
        target: &str,
        changes: &[ModeChange],
        ts: Option<i64>,
    ) -> Result<()> {
        {
            let mut inner = self.inner.write();
            inner.internal_server(source)?;
            send_modes(&mut inner, source, target, changes, ts)?;
        }
        self.wake_writer();
        Ok(())
    }

    /// Kill from one of our clients.
    pub fn kill_client(&self, source: &str, target: &str, reason: &str) -> Result<()> {
        {
            let mut inner = self.inner.write();
            inner.internal_client(source)?;
            send_kill(&mut inner, source, target, reason);
        }
        self.wake_writer();
        Ok(())
    }

    /// Kill from one of our servers.
    pub fn kill_server(&self, source: &str, target: &str, reason: &str) -> Result<()> {
        {
            let mut inner = self.inner.write();
            inner.internal_server(source)?;
            send_kill(&mut inner, source, target, reason);
        }
        self.wake_writer();
        Ok(())
    }

    /// Set a channel topic from one of our servers, burst style.
    pub fn topic_server(&self, source: &str, channel: &str, text: &str) -> Result<()> {
        {
            let mut inner = self.inner.write();
            inner.internal_server(source)?;
            let servername = inner.state.server(source)?.name.clone();
            let key = irc_to_lower(channel);
            inner.send_from(
                source,
                format!("FTOPIC {} {} {} :{}", key, now_ts(), servername, text),
            );
            let chan = inner.state.channel_entry(&key);
            chan.topic = text.to_string();
            chan.topic_set = true;
        }
        self.wake_writer();
        Ok(())
    }

    /// Invite a user to a channel from one of our clients.
    pub fn invite_client(&self, source: &str, target: &str, channel: &str) -> Result<()> {
        {
            let mut inner = self.inner.write();
            inner.internal_client(source)?;
            inner.send_from(source, format!("INVITE {} {}", target, channel));
        }
        self.wake_writer();
        Ok(())
    }

    /// Knock on a channel from one of our clients; travels encapsulated.
    pub fn knock_client(&self, source: &str, channel: &str, text: &str) -> Result<()> {
        {
            let mut inner = self.inner.write();
            inner.internal_client(source)?;
            inner.send_from(source, format!("ENCAP * KNOCK {} :{}", channel, text));
        }
        self.wake_writer();
        Ok(())
    }

    /// Set or clear (empty text) the away marker on one of our clients.
    pub fn away_client(&self, source: &str, text: &str) -> Result<()> {
        {
            let mut inner = self.inner.write();
            inner.internal_client(source)?;
            if text.is_empty() {
                inner.state.user_mut(source)?.away = None;
                inner.send_from(source, "AWAY");
            } else {
                inner.state.user_mut(source)?.away = Some(text.to_string());
                inner.send_from(source, format!("AWAY {} :{}", now_ts(), text));
            }
        }
        self.wake_writer();
        Ok(())
    }

    /// Ping a server; defaults to pinging the uplink from our main SID.
    /// A no-op before the uplink is known.
    pub fn ping_server(&self, source: Option<&str>, target: Option<&str>) -> Result<()> {
        {
            let mut inner = self.inner.write();
            let source = source
                .map(str::to_string)
                .unwrap_or_else(|| inner.state.sid.clone());
            let Some(target) = target.map(str::to_string).or_else(|| inner.state.uplink.clone())
            else {
                return Ok(());
            };
            inner.send_from(&source, format!("PING {} {}", source, target));
        }
        self.wake_writer();
        Ok(())
    }

    /// Update the ident, host, or realname of one of our clients.
    ///
    /// `field` is `IDENT`, `HOST`, or `REALNAME`/`GECOS`, case-insensitive.
    pub fn update_client(&self, client: &str, field: &str, text: &str) -> Result<()> {
        {
            let mut inner = self.inner.write();
            inner.internal_client(client)?;
            match field.to_uppercase().as_str() {
                "IDENT" => {
                    inner.state.user_mut(client)?.ident = text.to_string();
                    inner.send_from(client, format!("FIDENT {}", text));
                }
                "HOST" => {
                    inner.state.user_mut(client)?.host = text.to_string();
                    inner.send_from(client, format!("FHOST {}", text));
                }
                "REALNAME" | "GECOS" => {
                    inner.state.user_mut(client)?.realname = text.to_string();
                    inner.send_from(client, format!("FNAME :{}", text));
                }
                _ => return Err(ProtocolError::NotImplemented("changing this field of a client")),
            }
        }
        self.wake_writer();
        Ok(())
    }

    /// Numerics are answered locally by the peer's servers in this
    /// dialect; there is nothing to send.
    pub fn numeric_server(
        &self,
        _source: &str,
        _numeric: u16,
        _target: &str,
        _text: &str,
    ) -> Result<()> {
        Err(ProtocolError::NotImplemented("numeric sending"))
    }

    /// Disconnect one of our spawned servers, cascading its users away.
    pub fn squit_server(&self, source: &str, target: &str, reason: &str) -> Result<()> {
        let event = {
            let mut inner = self.inner.write();
            inner.internal_server(source)?;
            inner.send_from(source, format!("SQUIT {} :{}", target, reason));
            let outcome = inner.state.squit(target);
            let uids: Vec<String> = outcome.users.iter().map(|u| u.uid.clone()).collect();
            let nicks: Vec<String> = outcome.users.iter().map(|u| u.nick.clone()).collect();
            crate::hooks::HookEvent {
                source: source.to_string(),
                command: "SQUIT".to_string(),
                payload: match json!({
                    "target": target,
                    "text": reason,
                    "users": uids,
                    "nicks": nicks,
                }) {
                    serde_json::Value::Object(map) => map,
                    _ => unreachable!(),
                },
            }
        };
        self.wake_writer();
        self.hooks.dispatch(event);
        Ok(())
    }

    /// Part one of our clients from a channel.
    pub fn part_client(&self, client: &str, channel: &str, reason: &str) -> Result<()> {
        {
            let mut inner = self.inner.write();
            inner.internal_client(client)?;
            let key = irc_to_lower(channel);
            if reason.is_empty() {
                inner.send_from(client, format!("PART {}", key));
            } else {
                inner.send_from(client, format!("PART {} :{}", key, reason));
            }
            inner.state.part_channel(client, &key);
        }
        self.wake_writer();
        Ok(())
    }

    /// Quit and remove one of our clients.
    pub fn quit_client(&self, client: &str, reason: &str) -> Result<()> {
        {
            let mut inner = self.inner.write();
            inner.internal_client(client)?;
            inner.send_from(client, format!("QUIT :{}", reason));
            inner.state.remove_user(client);
        }
        self.wake_writer();
        Ok(())
    }

    /// Change the nick of one of our clients.
    pub fn nick_client(&self, client: &str, newnick: &str) -> Result<()> {
        {
            let mut inner = self.inner.write();
            inner.internal_client(client)?;
            inner.send_from(client, format!("NICK {} {}", newnick, now_ts()));
            inner.state.user_mut(client)?.nick = newnick.to_string();
        }
        self.wake_writer();
        Ok(())
    }

    /// Kick a user from a channel as one of our clients.
    pub fn kick_client(&self, source: &str, channel: &str, target: &str, reason: &str) -> Result<()> {
        {
            let mut inner = self.inner.write();
            inner.internal_client(source)?;
            send_kick(&mut inner, source, channel, target, reason);
        }
        self.wake_writer();
        Ok(())
    }

    /// Kick a user from a channel as one of our servers.
    pub fn kick_server(&self, source: &str, channel: &str, target: &str, reason: &str) -> Result<()> {
        {
            let mut inner = self.inner.write();
            inner.internal_server(source)?;
            send_kick(&mut inner, source, channel, target, reason);
        }
        self.wake_writer();
        Ok(())
    }

    /// PRIVMSG from one of our clients.
    pub fn message_client(&self, source: &str, target: &str, text: &str) -> Result<()> {
        {
            let mut inner = self.inner.write();
            inner.internal_client(source)?;
            inner.send_from(source, format!("PRIVMSG {} :{}", target, text));
        }
        self.wake_writer();
        Ok(())
    }

    /// NOTICE from one of our clients.
    pub fn notice_client(&self, source: &str, target: &str, text: &str) -> Result<()> {
        {
            let mut inner = self.inner.write();
            inner.internal_client(source)?;
            inner.send_from(source, format!("NOTICE {} :{}", target, text));
        }
        self.wake_writer();
        Ok(())
    }
}

/// Shared mode-emission path for clients and servers. A umode `+o` in the
/// change set needs the dialect's OPERTYPE side channel first.
fn send_modes(
    inner: &mut Inner,
    source: &str,
    target: &str,
    changes: &[ModeChange],
    ts: Option<i64>,
) -> Result<()> {
    let target_is_channel = crate::validate::is_channel(target);
    if !target_is_channel
        && changes
            .iter()
            .any(|c| c.sign == ModeSign::Add && c.letter == 'o' && c.arg.is_none())
    {
        inner.oper_up(target, None)?;
    }
    let joined = join_modes(changes);
    if target_is_channel {
        let key = irc_to_lower(target);
        inner.state.apply_channel_modes(&inner.vocab, &key, changes);
        let ts = ts.unwrap_or_else(|| inner.state.channels[&key].ts);
        inner.send_from(source, format!("FMODE {} {} {}", key, ts, joined));
    } else {
        inner.state.apply_user_modes(target, changes)?;
        inner.send_from(source, format!("MODE {} {}", target, joined));
    }
    Ok(())
}

fn send_kill(inner: &mut Inner, source: &str, target: &str, reason: &str) {
    inner.send_from(source, format!("KILL {} :{}", target, reason));
    // Only our own clients disappear immediately; a remote target quits
    // from its own server when the kill lands.
    if inner.state.internal_client_server(target).is_some() {
        inner.state.remove_user(target);
    }
}

fn send_kick(inner: &mut Inner, source: &str, channel: &str, target: &str, reason: &str) {
    let key = irc_to_lower(channel);
    inner.send_from(source, format!("KICK {} {} :{}", key, target, reason));
    inner.state.part_channel(target, &key);
}
