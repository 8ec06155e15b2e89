//! Integration tests for the inbound side of the link: registration,
//! capability negotiation, and command handling against a live state
//! replica.

use std::sync::{Arc, Mutex};

use serde_json::json;
use slink_proto::{HookEvent, LinkConfig, ProtocolError, SpanningTree};

fn config() -> LinkConfig {
    LinkConfig::from_toml_str(
        r#"
        sid = "0AL"
        hostname = "services.example.net"
        sendpass = "sendpw"
        recvpass = "recvpw"
        serverdesc = "network services"
        "#,
    )
    .unwrap()
}

/// A protocol instance that has completed registration and capability
/// negotiation against a fictional uplink `70M`.
fn linked() -> SpanningTree {
    let proto = SpanningTree::new(config()).unwrap();
    proto
        .handle_line("SERVER inspircd.example.net recvpw 0 70M :test uplink")
        .unwrap();
    proto.handle_line("CAPAB START 1202").unwrap();
    proto
        .handle_line(
            "CAPAB CHANMODES :ban=b banexception=e halfop=%h inviteonly=i key=k \
             limit=l moderated=m noextmsg=n nonotice=T op=@o founder=~q \
             reginvite=R secret=s topiclock=t voice=+v",
        )
        .unwrap();
    proto
        .handle_line("CAPAB USERMODES :invisible=i oper=o snomask=s wallops=w")
        .unwrap();
    proto
        .handle_line(
            "CAPAB CAPABILITIES :NICKMAX=21 CHANMAX=64 PROTOCOL=1202 \
             PREFIX=(Yqaohv)!~&@%+ CHANMODES=Ibe,k,Ffjl,CPRSTcimnprstz USERMODES=,,s,iow",
        )
        .unwrap();
    proto.handle_line("CAPAB END").unwrap();
    proto.take_outbound();
    proto
}

fn capture(proto: &SpanningTree) -> Arc<Mutex<Vec<HookEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    proto.hooks().subscribe(Arc::new(move |event: &HookEvent| {
        sink.lock().unwrap().push(event.clone());
    }));
    seen
}

fn introduce_user(proto: &SpanningTree, uid: &str, nick: &str) {
    proto
        .handle_line(&format!(
            ":70M UID {uid} 1429934638 {nick} real.example.net shown.example.net \
             ident 10.0.0.1 1429934638 +i :some user"
        ))
        .unwrap();
}

#[test]
fn test_registration_and_capabilities() {
    let proto = linked();
    assert!(proto.connected());
    assert_eq!(proto.max_nick_len(), Some(21));
    proto.with_state(|net| {
        assert_eq!(net.uplink.as_deref(), Some("70M"));
        assert_eq!(net.servers["70M"].name, "inspircd.example.net");
        assert!(net.servers["70M"].uplink.is_none());
        // Our pseudo-server hangs off the uplink.
        assert_eq!(net.servers["0AL"].uplink.as_deref(), Some("70M"));
        assert!(net.servers["0AL"].internal);
    });
}

#[test]
fn test_bad_recvpass_is_fatal() {
    let proto = SpanningTree::new(config()).unwrap();
    let result = proto.handle_line("SERVER evil.example.net wrongpw 0 70M :bad uplink");
    assert!(matches!(result, Err(ProtocolError::AuthFailure(_))));
}

#[test]
fn test_ancient_peer_is_fatal() {
    let proto = SpanningTree::new(config()).unwrap();
    proto
        .handle_line("SERVER inspircd.example.net recvpw 0 70M :test uplink")
        .unwrap();
    let result = proto.handle_line("CAPAB CAPABILITIES :PROTOCOL=1201");
    assert!(matches!(
        result,
        Err(ProtocolError::ProtocolTooOld { got: 1201, min: 1202 })
    ));
    assert!(!proto.connected());
}

#[test]
fn test_connect_burst_order() {
    let proto = SpanningTree::new(config()).unwrap();
    proto.connect();
    let out = proto.take_outbound();
    assert_eq!(out[0], "CAPAB START 1202");
    assert_eq!(out[1], "CAPAB CAPABILITIES :PROTOCOL=1202");
    assert_eq!(out[2], "CAPAB END");
    assert!(out[3].starts_with("SERVER services.example.net sendpw 0 0AL :network services"));
    assert!(out[4].starts_with(":0AL BURST "));
    assert_eq!(out[5], ":0AL ENDBURST");
}

#[test]
fn test_fjoin_into_empty_state() {
    let proto = linked();
    let seen = capture(&proto);

    proto
        .handle_line(":70M FJOIN #chat 1423790411 +nt :o,70MAAAAAA v,70MAAAAAB")
        .unwrap();

    proto.with_state(|net| {
        let chan = net.channel("#chat").unwrap();
        assert_eq!(chan.ts, 1423790411);
        assert!(chan.modes.contains(&('n', None)));
        assert!(chan.modes.contains(&('t', None)));
        assert!(chan.users.contains("70MAAAAAA"));
        assert!(chan.users.contains("70MAAAAAB"));
        assert!(chan.has_prefix("70MAAAAAA", 'o'));
        assert!(chan.has_prefix("70MAAAAAB", 'v'));
    });

    let events = seen.lock().unwrap();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.source, "70M");
    assert_eq!(event.command, "FJOIN");
    assert_eq!(event.payload["channel"], json!("#chat"));
    assert_eq!(event.payload["users"], json!(["70MAAAAAA", "70MAAAAAB"]));
    assert_eq!(event.payload["ts"], json!(1423790411));
}

#[test]
fn test_fjoin_losing_side_keeps_members_drops_prefixes() {
    let proto = linked();
    proto
        .handle_line(":70M FJOIN #chat 1000 +nt :o,70MAAAAAA")
        .unwrap();
    // A second burst with a newer TS loses the fight: membership lands,
    // its prefixes do not, and the channel TS stays put.
    proto
        .handle_line(":70M FJOIN #chat 2000 + :o,70MAAAAAB")
        .unwrap();

    proto.with_state(|net| {
        let chan = net.channel("#chat").unwrap();
        assert_eq!(chan.ts, 1000);
        assert!(chan.users.contains("70MAAAAAB"));
        assert!(chan.has_prefix("70MAAAAAA", 'o'));
        assert!(!chan.has_prefix("70MAAAAAB", 'o'));
    });
}

#[test]
fn test_fjoin_lower_ts_resets_our_state() {
    let proto = linked();
    proto
        .handle_line(":70M FJOIN #chat 5000 +ntl 20 :o,70MAAAAAA")
        .unwrap();
    proto
        .handle_line(":70M FJOIN #chat 4000 +m :v,70MAAAAAB")
        .unwrap();

    proto.with_state(|net| {
        let chan = net.channel("#chat").unwrap();
        assert_eq!(chan.ts, 4000);
        // Their burst's modes apply; our non-list modes were cleared.
        assert!(chan.modes.contains(&('m', None)));
        assert!(!chan.modes.contains(&('n', None)));
        assert!(!chan.modes.contains(&('l', Some("20".into()))));
        assert!(!chan.has_prefix("70MAAAAAA", 'o'));
        assert!(chan.has_prefix("70MAAAAAB", 'v'));
    });
}

#[test]
fn test_channel_names_fold() {
    let proto = linked();
    proto
        .handle_line(":70M FJOIN #FOO 1000 +nt :o,70MAAAAAA")
        .unwrap();
    proto
        .handle_line(":70M FJOIN #[a] 1000 +nt :,70MAAAAAA")
        .unwrap();
    proto.with_state(|net| {
        assert!(net.channel("#foo").is_some());
        assert!(net.channel("#FOO").is_some());
        assert!(net.channel("#{a}").is_some());
        assert!(net.channel("#[A]").is_some());
    });
}

#[test]
fn test_uid_introduction() {
    let proto = linked();
    let seen = capture(&proto);

    proto
        .handle_line(
            ":70M UID 70MAAAAAB 1429934638 GL real.example.net shown.example.net \
             gl 10.0.0.1 1429934638 +iws +cC :a real person",
        )
        .unwrap();

    proto.with_state(|net| {
        let user = net.user("70MAAAAAB").unwrap();
        assert_eq!(user.nick, "GL");
        assert_eq!(user.ts, 1429934638);
        assert_eq!(user.ident, "gl");
        assert_eq!(user.host, "shown.example.net");
        assert_eq!(user.realhost, "real.example.net");
        assert_eq!(user.ip, "10.0.0.1");
        assert_eq!(user.realname, "a real person");
        assert!(user.modes.contains(&('i', None)));
        assert!(user.modes.contains(&('w', None)));
        // The snomask argument pairs with +s.
        assert!(user.modes.contains(&('s', Some("+cC".into()))));
        assert!(net.servers["70M"].users.contains("70MAAAAAB"));
    });

    let events = seen.lock().unwrap();
    assert_eq!(events[0].command, "UID");
    assert_eq!(events[0].payload["uid"], json!("70MAAAAAB"));
    assert_eq!(events[0].payload["nick"], json!("GL"));
    assert_eq!(events[0].payload["ip"], json!("10.0.0.1"));
}

#[test]
fn test_fmode_carries_old_channel_snapshot() {
    let proto = linked();
    proto
        .handle_line(":70M FJOIN #chat 1423790411 +nt :o,70MAAAAAA v,70MAAAAAD")
        .unwrap();
    let seen = capture(&proto);

    proto
        .handle_line(":70MAAAAAA FMODE #chat 1433653462 +hhT 70MAAAAAA 70MAAAAAD")
        .unwrap();

    proto.with_state(|net| {
        let chan = net.channel("#chat").unwrap();
        assert!(chan.has_prefix("70MAAAAAA", 'h'));
        assert!(chan.has_prefix("70MAAAAAD", 'h'));
        assert!(chan.modes.contains(&('T', None)));
    });

    let events = seen.lock().unwrap();
    let event = &events[0];
    assert_eq!(event.source, "70MAAAAAA");
    assert_eq!(event.command, "FMODE");
    assert_eq!(event.payload["ts"], json!(1433653462));
    assert_eq!(
        event.payload["modes"],
        json!([["+h", "70MAAAAAA"], ["+h", "70MAAAAAD"], ["+T", null]])
    );
    // The snapshot shows the channel before the change.
    let oldchan = &event.payload["oldchan"];
    assert_eq!(oldchan["ts"], json!(1423790411));
    assert!(oldchan["prefixes"]["70MAAAAAA"]
        .as_array()
        .unwrap()
        .contains(&json!("o")));
}

#[test]
fn test_opertype_emits_opered_then_mode() {
    let proto = linked();
    introduce_user(&proto, "70MAAAAAB", "oper");
    let seen = capture(&proto);

    proto.handle_line(":70MAAAAAB OPERTYPE Network_Owner").unwrap();

    proto.with_state(|net| {
        let user = net.user("70MAAAAAB").unwrap();
        assert_eq!(user.opertype.as_deref(), Some("Network Owner"));
        assert!(user.modes.contains(&('o', None)));
    });

    let events = seen.lock().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].command, "SLINK_CLIENT_OPERED");
    assert_eq!(events[0].payload["text"], json!("Network Owner"));
    assert_eq!(events[1].command, "MODE");
    assert_eq!(events[1].payload["modes"], json!([["+o", null]]));
    assert_eq!(events[1].payload["target"], json!("70MAAAAAB"));
}

#[test]
fn test_user_mode_change() {
    let proto = linked();
    introduce_user(&proto, "70MAAAAAA", "someone");
    let seen = capture(&proto);

    proto.handle_line(":70MAAAAAA MODE 70MAAAAAA -i+w").unwrap();

    proto.with_state(|net| {
        let user = net.user("70MAAAAAA").unwrap();
        assert!(!user.modes.contains(&('i', None)));
        assert!(user.modes.contains(&('w', None)));
    });
    let events = seen.lock().unwrap();
    assert_eq!(events[0].command, "MODE");
    assert_eq!(events[0].payload["modes"], json!([["-i", null], ["+w", null]]));
}

#[test]
fn test_ftopic_and_svstopic() {
    let proto = linked();
    let seen = capture(&proto);

    proto
        .handle_line(":70M FTOPIC #channel 1434510754 GLo|o|!GLolol@example.net :Some channel topic")
        .unwrap();
    proto.with_state(|net| {
        let chan = net.channel("#channel").unwrap();
        assert_eq!(chan.topic, "Some channel topic");
        assert!(chan.topic_set);
    });

    proto
        .handle_line(":70M SVSTOPIC #channel 1434510800 services :Locked topic")
        .unwrap();
    proto.with_state(|net| {
        assert_eq!(net.channel("#channel").unwrap().topic, "Locked topic");
    });

    let events = seen.lock().unwrap();
    assert_eq!(events[0].command, "FTOPIC");
    assert_eq!(events[0].payload["topic"], json!("Some channel topic"));
    assert_eq!(events[1].command, "SVSTOPIC");
}

#[test]
fn test_invite_is_pure_notification() {
    let proto = linked();
    let seen = capture(&proto);
    proto.handle_line(":70MAAAAAC INVITE 0ALAAAAAA #blah").unwrap();

    let events = seen.lock().unwrap();
    assert_eq!(events[0].command, "INVITE");
    assert_eq!(events[0].payload["target"], json!("0ALAAAAAA"));
    assert_eq!(events[0].payload["channel"], json!("#blah"));
    proto.with_state(|net| assert!(net.channel("#blah").is_none()));
}

#[test]
fn test_encap_knock_routes_as_knock() {
    let proto = linked();
    let seen = capture(&proto);

    proto
        .handle_line(":70MAAAAAA ENCAP * KNOCK #locked :let me in")
        .unwrap();
    // Encapsulated commands we do not understand are swallowed.
    proto
        .handle_line(":70MAAAAAA ENCAP * SOMETHING #locked :payload")
        .unwrap();

    let events = seen.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].command, "KNOCK");
    assert_eq!(events[0].payload["channel"], json!("#locked"));
    assert_eq!(events[0].payload["text"], json!("let me in"));
}

#[test]
fn test_field_update_commands() {
    let proto = linked();
    introduce_user(&proto, "70MAAAAAB", "changer");
    let seen = capture(&proto);

    proto.handle_line(":70MAAAAAB FIDENT newident").unwrap();
    proto.handle_line(":70MAAAAAB FHOST new.host.example").unwrap();
    proto.handle_line(":70MAAAAAB FNAME :brand new name").unwrap();

    proto.with_state(|net| {
        let user = net.user("70MAAAAAB").unwrap();
        assert_eq!(user.ident, "newident");
        assert_eq!(user.host, "new.host.example");
        assert_eq!(user.realname, "brand new name");
    });

    let events = seen.lock().unwrap();
    assert_eq!(events[0].payload["newident"], json!("newident"));
    assert_eq!(events[1].payload["newhost"], json!("new.host.example"));
    assert_eq!(events[2].payload["newgecos"], json!("brand new name"));
}

#[test]
fn test_idle_reply() {
    let proto = linked();
    introduce_user(&proto, "70MAAAAAB", "target");
    proto.take_outbound();

    proto.handle_line(":70MAAAAAA IDLE 70MAAAAAB").unwrap();
    let out = proto.take_outbound();
    assert_eq!(out, vec![":70MAAAAAB IDLE 70MAAAAAA 1429934638 0"]);
}

#[test]
fn test_ping_answered_for_internal_servers_only() {
    let proto = linked();
    proto.take_outbound();

    proto.handle_line(":70M PING 70M 0AL").unwrap();
    assert_eq!(proto.take_outbound(), vec![":0AL PONG 0AL 70M"]);

    proto.handle_line(":70M PING 70M 99Z").unwrap();
    assert!(proto.take_outbound().is_empty());
}

#[test]
fn test_pong_updates_liveness() {
    let proto = linked();
    assert_eq!(proto.last_pong(), 0);
    proto.handle_line(":70M PONG 70M 0AL").unwrap();
    assert!(proto.last_pong() > 0);

    // A PONG for somebody else changes nothing.
    let before = proto.last_pong();
    proto.handle_line(":99Z PONG 99Z 0AL").unwrap();
    assert_eq!(proto.last_pong(), before);
}

#[test]
fn test_away_set_and_clear() {
    let proto = linked();
    introduce_user(&proto, "70MAAAAAB", "sleepy");
    let seen = capture(&proto);

    proto.handle_line(":70MAAAAAB AWAY 1439371390 :Auto-away").unwrap();
    proto.with_state(|net| {
        assert_eq!(net.user("70MAAAAAB").unwrap().away.as_deref(), Some("Auto-away"));
    });

    proto.handle_line(":70MAAAAAB AWAY").unwrap();
    proto.with_state(|net| {
        assert!(net.user("70MAAAAAB").unwrap().away.is_none());
    });

    let events = seen.lock().unwrap();
    assert_eq!(events[0].payload["text"], json!("Auto-away"));
    assert_eq!(events[0].payload["ts"], json!(1439371390));
    assert_eq!(events[1].payload["text"], json!(""));
}

#[test]
fn test_server_introduction_and_squit_cascade() {
    let proto = linked();
    proto
        .handle_line(":70M SERVER leaf.example.net * 1 80M :a leaf")
        .unwrap();
    proto
        .handle_line(":80M SERVER deeper.example.net * 2 90M :behind the leaf")
        .unwrap();
    introduce_user(&proto, "70MAAAAAA", "survivor");
    proto
        .handle_line(
            ":80M UID 80MAAAAAA 100 doomed real.example.net real.example.net \
             doomed 10.0.0.2 100 +i :doomed user",
        )
        .unwrap();
    proto
        .handle_line(
            ":90M UID 90MAAAAAA 100 gone real.example.net real.example.net \
             gone 10.0.0.3 100 +i :another doomed user",
        )
        .unwrap();
    proto.handle_line(":70M FJOIN #chat 1000 +nt :o,80MAAAAAA ,70MAAAAAA").unwrap();

    let seen = capture(&proto);
    proto.handle_line(":70M SQUIT 80M :netsplit").unwrap();

    proto.with_state(|net| {
        assert!(!net.servers.contains_key("80M"));
        assert!(!net.servers.contains_key("90M"));
        assert!(net.servers.contains_key("70M"));
        assert!(net.users.get("80MAAAAAA").is_none());
        assert!(net.users.get("90MAAAAAA").is_none());
        assert!(net.users.contains_key("70MAAAAAA"));
        assert!(!net.channel("#chat").unwrap().users.contains("80MAAAAAA"));
    });

    let events = seen.lock().unwrap();
    let event = &events[0];
    assert_eq!(event.command, "SQUIT");
    assert_eq!(event.payload["target"], json!("80M"));
    assert_eq!(event.payload["text"], json!("netsplit"));
    let users = event.payload["users"].as_array().unwrap();
    let nicks = event.payload["nicks"].as_array().unwrap();
    assert_eq!(users.len(), 2);
    assert!(nicks.contains(&json!("doomed")));
    assert!(nicks.contains(&json!("gone")));
}

#[test]
fn test_endburst_hook_is_empty() {
    let proto = linked();
    let seen = capture(&proto);
    proto.handle_line(":70M ENDBURST").unwrap();

    let events = seen.lock().unwrap();
    assert_eq!(events[0].command, "ENDBURST");
    assert!(events[0].payload.is_empty());
}

#[test]
fn test_quit_nick_part_kick_kill() {
    let proto = linked();
    introduce_user(&proto, "70MAAAAAA", "alice");
    introduce_user(&proto, "70MAAAAAB", "bob");
    proto
        .handle_line(":70M FJOIN #chat 1000 +nt :o,70MAAAAAA v,70MAAAAAB")
        .unwrap();
    let seen = capture(&proto);

    proto.handle_line(":70MAAAAAA NICK alicia 1500").unwrap();
    proto.with_state(|net| assert_eq!(net.user("70MAAAAAA").unwrap().nick, "alicia"));

    proto.handle_line(":70MAAAAAB PART #chat :bye").unwrap();
    proto.with_state(|net| {
        assert!(!net.channel("#chat").unwrap().users.contains("70MAAAAAB"));
    });

    proto.handle_line(":70MAAAAAB QUIT :Leaving").unwrap();
    proto.with_state(|net| assert!(net.users.get("70MAAAAAB").is_none()));

    proto.handle_line(":70M KILL 70MAAAAAA :bad behavior").unwrap();
    proto.with_state(|net| {
        assert!(net.users.get("70MAAAAAA").is_none());
        // Last member removed, channel reaped.
        assert!(net.channel("#chat").is_none());
    });

    let events = seen.lock().unwrap();
    assert_eq!(events[0].command, "NICK");
    assert_eq!(events[0].payload["oldnick"], json!("alice"));
    assert_eq!(events[0].payload["newnick"], json!("alicia"));
    assert_eq!(events[1].command, "PART");
    assert_eq!(events[1].payload["channels"], json!(["#chat"]));
    assert_eq!(events[2].command, "QUIT");
    assert_eq!(events[2].payload["text"], json!("Leaving"));
    assert_eq!(events[3].command, "KILL");
    assert_eq!(events[3].payload["userdata"]["nick"], json!("alicia"));
}

#[test]
fn test_unknown_verbs_are_ignored() {
    let proto = linked();
    let seen = capture(&proto);
    proto.handle_line(":70M FLURB whatever :args here").unwrap();
    proto.handle_line(":70M METADATA 70MAAAAAA accountname :admin").unwrap();
    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn test_handler_errors_skip_the_line() {
    let proto = linked();
    // MODE for a uid we never saw: logged and skipped, never fatal.
    proto.handle_line(":70MZZZZZZ MODE 70MZZZZZZ +i").unwrap();
    // Arity problems are skipped the same way.
    proto.handle_line(":70M FJOIN #chat").unwrap();
}
