//! The authoritative local replica of the network.
//!
//! Servers, users, and channels are kept in `id -> record` maps with
//! membership expressed as sets of identifiers on both sides, never as
//! direct object-graph edges. Channel names are keyed in rfc1459-folded
//! form. The store owns every record; hook consumers only ever see
//! serialized snapshots.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;
use tracing::debug;

use crate::casemap::irc_to_lower;
use crate::error::{ProtocolError, Result};
use crate::modes::{ModeChange, ModePair, ModeSign};
use crate::vocab::ModeVocabulary;

/// Seconds since epoch, the protocol's native timestamp unit.
pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

/// One server in the spanning tree.
#[derive(Debug, Clone, Serialize)]
pub struct Server {
    pub sid: String,
    pub name: String,
    pub description: String,
    /// SID this server hangs off; `None` only for the network root.
    pub uplink: Option<String>,
    /// Whether this is one of our own pseudo-servers.
    pub internal: bool,
    pub users: BTreeSet<String>,
}

/// One user somewhere on the network.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub uid: String,
    pub nick: String,
    pub ts: i64,
    pub ident: String,
    pub host: String,
    pub realhost: String,
    pub ip: String,
    pub realname: String,
    pub modes: BTreeSet<ModePair>,
    pub channels: BTreeSet<String>,
    pub opertype: Option<String>,
    pub away: Option<String>,
    /// Whether plugins may puppet this client.
    pub manipulatable: bool,
}

impl User {
    pub fn new(uid: &str, nick: &str, ts: i64) -> Self {
        User {
            uid: uid.to_string(),
            nick: nick.to_string(),
            ts,
            ident: String::new(),
            host: String::new(),
            realhost: String::new(),
            ip: String::new(),
            realname: String::new(),
            modes: BTreeSet::new(),
            channels: BTreeSet::new(),
            opertype: None,
            away: None,
            manipulatable: false,
        }
    }
}

/// One channel, created implicitly on first reference.
#[derive(Debug, Clone, Serialize)]
pub struct Channel {
    /// Folded name, identical to the store key.
    pub name: String,
    pub ts: i64,
    pub topic: String,
    pub topic_set: bool,
    pub modes: BTreeSet<ModePair>,
    pub users: BTreeSet<String>,
    /// Membership status letters per member uid.
    pub prefixes: BTreeMap<String, BTreeSet<char>>,
}

impl Channel {
    fn new(name: &str, ts: i64) -> Self {
        Channel {
            name: name.to_string(),
            ts,
            topic: String::new(),
            topic_set: false,
            modes: BTreeSet::new(),
            users: BTreeSet::new(),
            prefixes: BTreeMap::new(),
        }
    }

    /// Whether `uid` holds the given status letter here.
    pub fn has_prefix(&self, uid: &str, letter: char) -> bool {
        self.prefixes.get(uid).map(|p| p.contains(&letter)).unwrap_or(false)
    }
}

/// Everything removed by one SQUIT cascade.
#[derive(Debug, Default)]
pub struct SquitOutcome {
    /// SIDs removed, target first.
    pub sids: Vec<String>,
    /// Full records of every user lost.
    pub users: Vec<User>,
}

/// The network state store.
#[derive(Debug)]
pub struct Network {
    /// Our own SID.
    pub sid: String,
    /// SID of the server we registered against, once known.
    pub uplink: Option<String>,
    pub servers: HashMap<String, Server>,
    pub users: HashMap<String, User>,
    pub channels: HashMap<String, Channel>,
}

impl Network {
    /// Create a store pre-seeded with the local pseudo-server.
    pub fn new(sid: &str, name: &str, description: &str) -> Self {
        let mut servers = HashMap::new();
        servers.insert(
            sid.to_string(),
            Server {
                sid: sid.to_string(),
                name: name.to_string(),
                description: description.to_string(),
                uplink: None,
                internal: true,
                users: BTreeSet::new(),
            },
        );
        Network {
            sid: sid.to_string(),
            uplink: None,
            servers,
            users: HashMap::new(),
            channels: HashMap::new(),
        }
    }

    /// Look up a channel without creating it.
    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(&irc_to_lower(name))
    }

    /// Fetch-or-create a channel record, keyed folded.
    pub fn channel_entry(&mut self, name: &str) -> &mut Channel {
        let key = irc_to_lower(name);
        self.channels
            .entry(key.clone())
            .or_insert_with(|| Channel::new(&key, now_ts()))
    }

    pub fn user(&self, uid: &str) -> Result<&User> {
        self.users
            .get(uid)
            .ok_or_else(|| ProtocolError::UnknownTarget(uid.to_string()))
    }

    pub fn user_mut(&mut self, uid: &str) -> Result<&mut User> {
        self.users
            .get_mut(uid)
            .ok_or_else(|| ProtocolError::UnknownTarget(uid.to_string()))
    }

    pub fn server(&self, sid: &str) -> Result<&Server> {
        self.servers
            .get(sid)
            .ok_or_else(|| ProtocolError::UnknownTarget(sid.to_string()))
    }

    /// The SID serving `uid`, when `uid` belongs to one of our own
    /// pseudo-servers.
    pub fn internal_client_server(&self, uid: &str) -> Option<String> {
        let user = self.users.get(uid)?;
        let sid = &user.uid[..3.min(user.uid.len())];
        let server = self.servers.get(sid)?;
        server.internal.then(|| sid.to_string())
    }

    pub fn is_internal_server(&self, sid: &str) -> bool {
        self.servers.get(sid).map(|s| s.internal).unwrap_or(false)
    }

    /// Record a new user under its server.
    pub fn add_user(&mut self, user: User) -> Result<()> {
        let sid = user.uid[..3.min(user.uid.len())].to_string();
        let server = self
            .servers
            .get_mut(&sid)
            .ok_or_else(|| ProtocolError::UnknownTarget(sid.clone()))?;
        server.users.insert(user.uid.clone());
        self.users.insert(user.uid.clone(), user);
        Ok(())
    }

    /// Add `uid` to a channel, updating both membership sets.
    ///
    /// Tolerates a uid we have not seen yet; the membership on the channel
    /// side is recorded anyway, matching burst ordering quirks.
    pub fn join_channel(&mut self, uid: &str, channel: &str) {
        let key = irc_to_lower(channel);
        self.channel_entry(&key).users.insert(uid.to_string());
        match self.users.get_mut(uid) {
            Some(user) => {
                user.channels.insert(key);
            }
            None => debug!(%uid, %channel, "membership for a uid we have not seen yet"),
        }
    }

    /// Remove `uid` from a channel; empty channels are reaped.
    pub fn part_channel(&mut self, uid: &str, channel: &str) {
        let key = irc_to_lower(channel);
        self.detach_member(uid, &key);
        if let Some(user) = self.users.get_mut(uid) {
            user.channels.remove(&key);
        }
    }

    /// Drop one membership on the channel side, reaping the channel when
    /// its last member leaves.
    fn detach_member(&mut self, uid: &str, key: &str) {
        let mut reap = false;
        if let Some(chan) = self.channels.get_mut(key) {
            chan.users.remove(uid);
            chan.prefixes.remove(uid);
            reap = chan.users.is_empty();
        }
        if reap {
            self.channels.remove(key);
        }
    }

    /// Remove a user everywhere and return the record.
    pub fn remove_user(&mut self, uid: &str) -> Option<User> {
        let user = self.users.remove(uid)?;
        for channel in &user.channels {
            self.detach_member(uid, channel);
        }
        let sid = &user.uid[..3.min(user.uid.len())];
        if let Some(server) = self.servers.get_mut(sid) {
            server.users.remove(uid);
        }
        Some(user)
    }

    /// Destroy a server and every server whose uplink chain passes through
    /// it, along with all their users.
    pub fn squit(&mut self, target: &str) -> SquitOutcome {
        let mut outcome = SquitOutcome::default();
        let mut pending = vec![target.to_string()];

        while let Some(sid) = pending.pop() {
            let Some(server) = self.servers.remove(&sid) else {
                continue;
            };
            pending.extend(
                self.servers
                    .values()
                    .filter(|s| s.uplink.as_deref() == Some(sid.as_str()))
                    .map(|s| s.sid.clone()),
            );
            for uid in &server.users {
                // The server record is already gone, so detach directly.
                if let Some(user) = self.users.remove(uid) {
                    for channel in &user.channels {
                        self.detach_member(uid, channel);
                    }
                    outcome.users.push(user);
                }
            }
            outcome.sids.push(sid);
        }
        outcome
    }

    /// Apply parsed changes to a user's mode set.
    ///
    /// Setting a parameterised mode replaces any prior value of the same
    /// letter; unsetting drops the letter regardless of argument.
    pub fn apply_user_modes(&mut self, uid: &str, changes: &[ModeChange]) -> Result<()> {
        let user = self.user_mut(uid)?;
        for change in changes {
            match change.sign {
                ModeSign::Add => {
                    user.modes.retain(|(l, _)| *l != change.letter);
                    user.modes.insert((change.letter, change.arg.clone()));
                }
                ModeSign::Remove => {
                    user.modes.retain(|(l, _)| *l != change.letter);
                }
            }
        }
        Ok(())
    }

    /// Apply parsed changes to a channel.
    ///
    /// Prefix-mode changes carry the member uid as their argument and land
    /// in the per-member prefix set. Class A modes accumulate as
    /// `(letter, arg)` list entries; other parameterised modes replace
    /// prior values.
    pub fn apply_channel_modes(
        &mut self,
        vocab: &ModeVocabulary,
        channel: &str,
        changes: &[ModeChange],
    ) {
        let chan = self.channel_entry(channel);
        for change in changes {
            if vocab.is_prefix_mode(change.letter) {
                let Some(uid) = change.arg.as_deref() else {
                    continue;
                };
                match change.sign {
                    ModeSign::Add => {
                        chan.prefixes
                            .entry(uid.to_string())
                            .or_default()
                            .insert(change.letter);
                    }
                    ModeSign::Remove => {
                        if let Some(set) = chan.prefixes.get_mut(uid) {
                            set.remove(&change.letter);
                            if set.is_empty() {
                                chan.prefixes.remove(uid);
                            }
                        }
                    }
                }
            } else if vocab.is_list_mode(change.letter) {
                match change.sign {
                    ModeSign::Add => {
                        chan.modes.insert((change.letter, change.arg.clone()));
                    }
                    ModeSign::Remove => {
                        chan.modes
                            .retain(|(l, a)| *l != change.letter || *a != change.arg);
                    }
                }
            } else {
                match change.sign {
                    ModeSign::Add => {
                        chan.modes.retain(|(l, _)| *l != change.letter);
                        chan.modes.insert((change.letter, change.arg.clone()));
                    }
                    ModeSign::Remove => {
                        chan.modes.retain(|(l, _)| *l != change.letter);
                    }
                }
            }
        }
    }

    /// TS-based reconciliation: lower our channel TS when the remote side
    /// predates us, wiping our non-list modes and every member's status
    /// prefixes. Equal timestamps merge; a higher remote TS changes
    /// nothing. The channel TS never rises.
    pub fn update_ts(&mut self, vocab: &ModeVocabulary, channel: &str, their_ts: i64) {
        let list = vocab.cmode_classes.a.clone();
        let chan = self.channel_entry(channel);
        if their_ts < chan.ts {
            debug!(
                channel = %chan.name,
                ours = chan.ts,
                theirs = their_ts,
                "remote TS wins, clearing local channel state"
            );
            chan.ts = their_ts;
            chan.modes.retain(|(l, _)| list.contains(*l));
            chan.prefixes.clear();
        }
    }
}
