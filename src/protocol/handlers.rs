//! Inbound command handlers.
//!
//! Every handler shares one signature: `(inner, source, verb, args)`,
//! mutates the network state, and returns an optional hook payload. A
//! `None` swallows the line; errors here are non-fatal and make the
//! dispatcher skip the line.

use serde_json::{json, Value};

use crate::casemap::irc_to_lower;
use crate::error::{ProtocolError, Result};
use crate::hooks::{HookEvent, Payload};
use crate::modes::{parse_modes, ModeChange, ModeTarget};
use crate::state::{now_ts, Server, User};

use super::Inner;

fn need<'a>(args: &[&'a str], index: usize) -> Result<&'a str> {
    args.get(index)
        .copied()
        .ok_or_else(|| ProtocolError::InvalidArgument(format!("missing argument {}", index)))
}

fn need_ts(value: &str) -> Result<i64> {
    value
        .parse()
        .map_err(|_| ProtocolError::InvalidArgument(format!("bad timestamp {:?}", value)))
}

fn payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        _ => unreachable!("hook payloads are objects"),
    }
}

/// `FJOIN <channel> <ts> <modes...> :[prefixes,uid ...]` — burst-style
/// join with TS reconciliation. Their member prefixes only count when
/// their TS is not newer than ours; memberships are recorded either way.
pub(super) fn fjoin(
    inner: &mut Inner,
    _source: &str,
    _verb: &str,
    args: &[&str],
) -> Result<Option<Payload>> {
    let channel = irc_to_lower(need(args, 0)?);
    let their_ts = need_ts(need(args, 1)?)?;
    need(args, 2)?;
    let userlist = *args.last().expect("arity checked");

    let our_ts = inner.state.channel_entry(&channel).ts;
    inner.state.update_ts(&inner.vocab, &channel, their_ts);

    // The mode string is everything between the TS and the member list.
    let changes = parse_modes(&inner.vocab, ModeTarget::Channel, &args[2..args.len() - 1]);
    inner.state.apply_channel_modes(&inner.vocab, &channel, &changes);

    let mut users = Vec::new();
    for entry in userlist.split_whitespace() {
        let Some((prefixes, uid)) = entry.split_once(',') else {
            continue;
        };
        users.push(uid.to_string());
        inner.state.join_channel(uid, &channel);
        if their_ts <= our_ts {
            let prefix_changes: Vec<ModeChange> = prefixes
                .chars()
                .map(|m| ModeChange::add(m, Some(uid.to_string())))
                .collect();
            inner
                .state
                .apply_channel_modes(&inner.vocab, &channel, &prefix_changes);
        }
    }

    Ok(Some(payload(json!({
        "channel": channel,
        "users": users,
        "modes": changes,
        "ts": their_ts,
    }))))
}

/// `UID <uid> <ts> <nick> <realhost> <host> <ident> <ip> <ts> <modes...>
/// :<realname>` — user introduction.
pub(super) fn uid(
    inner: &mut Inner,
    _source: &str,
    _verb: &str,
    args: &[&str],
) -> Result<Option<Payload>> {
    let uid = need(args, 0)?;
    let ts = need_ts(need(args, 1)?)?;
    let (nick, realhost, host, ident, ip) =
        (need(args, 2)?, need(args, 3)?, need(args, 4)?, need(args, 5)?, need(args, 6)?);
    need(args, 8)?;
    let realname = *args.last().expect("arity checked");

    let mut user = User::new(uid, nick, ts);
    user.ident = ident.to_string();
    user.host = host.to_string();
    user.realhost = realhost.to_string();
    user.ip = ip.to_string();
    user.realname = realname.to_string();
    inner.state.add_user(user)?;

    let changes = parse_modes(&inner.vocab, ModeTarget::User, &args[8..args.len() - 1]);
    inner.state.apply_user_modes(uid, &changes)?;

    Ok(Some(payload(json!({
        "uid": uid,
        "ts": ts,
        "nick": nick,
        "realhost": realhost,
        "host": host,
        "ident": ident,
        "ip": ip,
    }))))
}

/// Post-registration `SERVER <name> * <hops> <sid> :<desc>` — a server
/// introduced behind the announcing source.
pub(super) fn server(
    inner: &mut Inner,
    source: &str,
    _verb: &str,
    args: &[&str],
) -> Result<Option<Payload>> {
    let name = need(args, 0)?.to_lowercase();
    let sid = need(args, 3)?.to_string();
    let description = *args.last().expect("arity checked");

    inner.state.servers.insert(
        sid.clone(),
        Server {
            sid: sid.clone(),
            name: name.clone(),
            description: description.to_string(),
            uplink: Some(source.to_string()),
            internal: false,
            users: Default::default(),
        },
    );

    Ok(Some(payload(json!({
        "name": name,
        "sid": sid,
        "text": description,
    }))))
}

/// `SQUIT <sid> :<reason>` — destroy a server and everything behind it.
pub(super) fn squit(
    inner: &mut Inner,
    _source: &str,
    _verb: &str,
    args: &[&str],
) -> Result<Option<Payload>> {
    let target = need(args, 0)?;
    let text = args.get(1).copied().unwrap_or("");

    let outcome = inner.state.squit(target);
    let uids: Vec<String> = outcome.users.iter().map(|u| u.uid.clone()).collect();
    let nicks: Vec<String> = outcome.users.iter().map(|u| u.nick.clone()).collect();

    Ok(Some(payload(json!({
        "target": target,
        "text": text,
        "users": uids,
        "nicks": nicks,
    }))))
}

/// `FMODE <channel> <ts> <modes...>` — channel mode change. The payload
/// carries a snapshot of the channel before the change.
pub(super) fn fmode(
    inner: &mut Inner,
    _source: &str,
    _verb: &str,
    args: &[&str],
) -> Result<Option<Payload>> {
    let channel = irc_to_lower(need(args, 0)?);
    let ts = need_ts(need(args, 1)?)?;
    need(args, 2)?;

    let oldchan = serde_json::to_value(inner.state.channel_entry(&channel).clone())
        .expect("channel snapshots serialize");
    let changes = parse_modes(&inner.vocab, ModeTarget::Channel, &args[2..]);
    inner.state.apply_channel_modes(&inner.vocab, &channel, &changes);

    Ok(Some(payload(json!({
        "target": channel,
        "modes": changes,
        "ts": ts,
        "oldchan": oldchan,
    }))))
}

/// `MODE <uid> <modes...>` — user mode change.
pub(super) fn mode(
    inner: &mut Inner,
    _source: &str,
    _verb: &str,
    args: &[&str],
) -> Result<Option<Payload>> {
    let target = need(args, 0)?;
    need(args, 1)?;
    let changes = parse_modes(&inner.vocab, ModeTarget::User, &args[1..]);
    inner.state.apply_user_modes(target, &changes)?;

    Ok(Some(payload(json!({
        "target": target,
        "modes": changes,
    }))))
}

/// `FTOPIC <channel> <ts> <setter> :<topic>` — topic on burst. SVSTOPIC
/// (topic lock) carries the same arguments and routes here too.
pub(super) fn ftopic(
    inner: &mut Inner,
    _source: &str,
    _verb: &str,
    args: &[&str],
) -> Result<Option<Payload>> {
    let channel = irc_to_lower(need(args, 0)?);
    let ts = need_ts(need(args, 1)?)?;
    let setter = need(args, 2)?;
    let topic = *args.last().expect("arity checked");

    let chan = inner.state.channel_entry(&channel);
    chan.topic = topic.to_string();
    chan.topic_set = true;

    Ok(Some(payload(json!({
        "channel": channel,
        "setter": setter,
        "ts": ts,
        "topic": topic,
    }))))
}

/// Runtime `TOPIC <channel> :<topic>` from a user.
pub(super) fn topic(
    inner: &mut Inner,
    source: &str,
    _verb: &str,
    args: &[&str],
) -> Result<Option<Payload>> {
    let channel = irc_to_lower(need(args, 0)?);
    need(args, 1)?;
    let topic = *args.last().expect("arity checked");

    let chan = inner.state.channel_entry(&channel);
    chan.topic = topic.to_string();
    chan.topic_set = true;

    Ok(Some(payload(json!({
        "channel": channel,
        "setter": source,
        "ts": now_ts(),
        "topic": topic,
    }))))
}

/// `INVITE <uid> <channel>` — pure notification, no state change.
pub(super) fn invite(
    _inner: &mut Inner,
    _source: &str,
    _verb: &str,
    args: &[&str],
) -> Result<Option<Payload>> {
    let target = need(args, 0)?;
    let channel = irc_to_lower(need(args, 1)?);
    Ok(Some(payload(json!({
        "target": target,
        "channel": channel,
    }))))
}

/// `ENCAP <targetmask> <subcommand> ...` — encapsulated commands. Only
/// network-wide KNOCK is surfaced; the `parse_as` key makes the hook bus
/// route it as a KNOCK event.
pub(super) fn encap(
    _inner: &mut Inner,
    _source: &str,
    _verb: &str,
    args: &[&str],
) -> Result<Option<Payload>> {
    if need(args, 0)? != "*" || need(args, 1)? != "KNOCK" {
        return Ok(None);
    }
    let channel = irc_to_lower(need(args, 2)?);
    let text = need(args, 3)?;
    Ok(Some(payload(json!({
        "parse_as": "KNOCK",
        "channel": channel,
        "text": text,
    }))))
}

/// `OPERTYPE <Type_With_Underscores>` — oper-up notification. This is
/// umode `+o` plus metadata in one line, so it queues a synthetic
/// `SLINK_CLIENT_OPERED` event and then surfaces as a MODE hook.
pub(super) fn opertype(
    inner: &mut Inner,
    source: &str,
    _verb: &str,
    args: &[&str],
) -> Result<Option<Payload>> {
    let opertype = need(args, 0)?.replace('_', " ");
    inner.state.user_mut(source)?.opertype = Some(opertype.clone());

    let changes = vec![ModeChange::add('o', None)];
    inner.state.apply_user_modes(source, &changes)?;

    inner.pending_hooks.push(HookEvent {
        source: source.to_string(),
        command: "SLINK_CLIENT_OPERED".to_string(),
        payload: payload(json!({ "text": opertype })),
    });

    Ok(Some(payload(json!({
        "target": source,
        "modes": changes,
        "parse_as": "MODE",
    }))))
}

/// `FIDENT <ident>` — ident change on the source user.
pub(super) fn fident(
    inner: &mut Inner,
    source: &str,
    _verb: &str,
    args: &[&str],
) -> Result<Option<Payload>> {
    let newident = need(args, 0)?;
    inner.state.user_mut(source)?.ident = newident.to_string();
    Ok(Some(payload(json!({
        "target": source,
        "newident": newident,
    }))))
}

/// `FHOST <host>` — displayed host change on the source user.
pub(super) fn fhost(
    inner: &mut Inner,
    source: &str,
    _verb: &str,
    args: &[&str],
) -> Result<Option<Payload>> {
    let newhost = need(args, 0)?;
    inner.state.user_mut(source)?.host = newhost.to_string();
    Ok(Some(payload(json!({
        "target": source,
        "newhost": newhost,
    }))))
}

/// `FNAME :<realname>` — realname change on the source user.
pub(super) fn fname(
    inner: &mut Inner,
    source: &str,
    _verb: &str,
    args: &[&str],
) -> Result<Option<Payload>> {
    let newgecos = need(args, 0)?;
    inner.state.user_mut(source)?.realname = newgecos.to_string();
    Ok(Some(payload(json!({
        "target": source,
        "newgecos": newgecos,
    }))))
}

/// `IDLE <uid>` — remote WHOIS idle query; answered on behalf of the
/// target with its signon TS and zero idle time.
pub(super) fn idle(
    inner: &mut Inner,
    source: &str,
    _verb: &str,
    args: &[&str],
) -> Result<Option<Payload>> {
    let target = need(args, 0)?;
    let target_ts = inner.state.user(target)?.ts;
    inner.send_from(target, format!("IDLE {} {} 0", source, target_ts));
    Ok(None)
}

/// `PING <source> <dest>` — answered when the destination is one of ours.
pub(super) fn ping(
    inner: &mut Inner,
    source: &str,
    _verb: &str,
    args: &[&str],
) -> Result<Option<Payload>> {
    let dest = need(args, 1)?;
    if inner.state.is_internal_server(dest) {
        inner.send_from(dest, format!("PONG {} {}", dest, source));
    }
    Ok(None)
}

/// `PONG <dest> <source>` — liveness bookkeeping for the uplink.
pub(super) fn pong(
    inner: &mut Inner,
    source: &str,
    _verb: &str,
    args: &[&str],
) -> Result<Option<Payload>> {
    if inner.state.uplink.as_deref() == Some(source) && args.get(1).copied() == Some(inner.state.sid.as_str())
    {
        inner.last_pong = now_ts();
    }
    Ok(None)
}

/// `AWAY [<ts> :<text>]` — away marker set or cleared.
pub(super) fn away(
    inner: &mut Inner,
    source: &str,
    _verb: &str,
    args: &[&str],
) -> Result<Option<Payload>> {
    match (args.first(), args.get(1)) {
        (Some(ts), Some(text)) => {
            inner.state.user_mut(source)?.away = Some(text.to_string());
            Ok(Some(payload(json!({ "text": text, "ts": need_ts(ts)? }))))
        }
        _ => {
            inner.state.user_mut(source)?.away = None;
            Ok(Some(payload(json!({ "text": "" }))))
        }
    }
}

/// `ENDBURST` — burst completion marker for the sending server.
pub(super) fn endburst(
    _inner: &mut Inner,
    _source: &str,
    _verb: &str,
    _args: &[&str],
) -> Result<Option<Payload>> {
    Ok(Some(Payload::new()))
}

/// `QUIT [:<reason>]` — the source user leaves the network.
pub(super) fn quit(
    inner: &mut Inner,
    source: &str,
    _verb: &str,
    args: &[&str],
) -> Result<Option<Payload>> {
    let text = args.first().copied().unwrap_or("");
    inner
        .state
        .remove_user(source)
        .ok_or_else(|| ProtocolError::UnknownTarget(source.to_string()))?;
    Ok(Some(payload(json!({ "text": text }))))
}

/// `KILL <uid> :<reason>` — forced removal of the target user.
pub(super) fn kill(
    inner: &mut Inner,
    _source: &str,
    _verb: &str,
    args: &[&str],
) -> Result<Option<Payload>> {
    let target = need(args, 0)?;
    let text = args.get(1).copied().unwrap_or("");
    let removed = inner
        .state
        .remove_user(target)
        .ok_or_else(|| ProtocolError::UnknownTarget(target.to_string()))?;
    Ok(Some(payload(json!({
        "target": target,
        "text": text,
        "userdata": serde_json::to_value(removed).expect("user snapshots serialize"),
    }))))
}

/// `NICK <newnick> <ts>` — nick change on the source user.
pub(super) fn nick(
    inner: &mut Inner,
    source: &str,
    _verb: &str,
    args: &[&str],
) -> Result<Option<Payload>> {
    let newnick = need(args, 0)?;
    let ts = need_ts(need(args, 1)?)?;
    let user = inner.state.user_mut(source)?;
    let oldnick = std::mem::replace(&mut user.nick, newnick.to_string());
    Ok(Some(payload(json!({
        "newnick": newnick,
        "oldnick": oldnick,
        "ts": ts,
    }))))
}

/// `PART <channel[,channel...]> [:<reason>]`.
pub(super) fn part(
    inner: &mut Inner,
    source: &str,
    _verb: &str,
    args: &[&str],
) -> Result<Option<Payload>> {
    let channels: Vec<String> = need(args, 0)?
        .split(',')
        .map(irc_to_lower)
        .collect();
    let text = args.get(1).copied().unwrap_or("");
    for channel in &channels {
        inner.state.part_channel(source, channel);
    }
    Ok(Some(payload(json!({
        "channels": channels,
        "text": text,
    }))))
}

/// `KICK <channel> <uid> :<reason>`.
pub(super) fn kick(
    inner: &mut Inner,
    _source: &str,
    _verb: &str,
    args: &[&str],
) -> Result<Option<Payload>> {
    let channel = irc_to_lower(need(args, 0)?);
    let target = need(args, 1)?;
    let text = args.get(2).copied().unwrap_or("");
    inner.state.part_channel(target, &channel);
    Ok(Some(payload(json!({
        "channel": channel,
        "target": target,
        "text": text,
    }))))
}
