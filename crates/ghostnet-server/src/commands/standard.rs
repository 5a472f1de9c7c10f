//! Built-in commands: help, kick, broadcast, tp and emote.

use ghostnet_proto::{Chat, Emote, Frame, PlayerStatus, Request, Session};

use super::{ArgParser, Command, CommandArg, CommandEnv, CommandError, CommandRegistry, OP_ID};
use crate::state::ServerState;

/// The built-in commands, in help order.
pub fn standard_commands() -> Vec<Command> {
    vec![
        Command::new(
            "help",
            "[page] | [command]",
            "Get help on how to use commands.",
            help,
        ),
        Command::new("kick", "<id>", "OP: Kick a player from the server.", kick),
        Command::new(
            "broadcast",
            "<text>",
            "OP: Broadcast something as the server.",
            broadcast,
        )
        .with_parser(ArgParser::Everything),
        Command::new("tp", "<id>", "Teleport to another player.", tp),
        Command::new(
            "emote",
            "<text> | i:<img> | p:<img>",
            "Send an emote appearing over your player.\n\
             Normal text appears over your player.\n\
             i: shows images from the \"GUI\" atlas.\n\
             p: shows images from the \"Portraits\" atlas.",
            emote,
        )
        .with_parser(ArgParser::Everything),
    ]
}

// ---------------------------------------------------------------------------
// help
// ---------------------------------------------------------------------------

fn help(env: &mut CommandEnv<'_>, args: &[CommandArg]) -> Result<(), CommandError> {
    let commands = env.server.commands();
    let text = match args.first() {
        Some(arg) if arg.as_int().is_none() => command_help(env.server, &commands, arg.as_str())?,
        Some(arg) => help_page(env.server, &commands, arg.as_int().unwrap_or(0))?,
        None => help_page(env.server, &commands, 0)?,
    };
    env.send(text);
    Ok(())
}

/// One page of usage lines. Pages count from zero.
fn help_page(
    server: &ServerState,
    commands: &CommandRegistry,
    page: i64,
) -> Result<String, CommandError> {
    let settings = server.settings();
    let size = settings.help_page_size.max(1);
    let pages = commands.len().div_ceil(size).max(1);
    if page < 0 || page as usize >= pages {
        return Err(CommandError::PageOutOfRange { page, pages });
    }

    let mut lines: Vec<String> = commands
        .iter()
        .skip(page as usize * size)
        .take(size)
        .map(|command| command.usage(&settings.command_prefix))
        .collect();
    lines.push(format!("Page {}/{pages}", page + 1));
    Ok(lines.join("\n"))
}

fn command_help(
    server: &ServerState,
    commands: &CommandRegistry,
    name: &str,
) -> Result<String, CommandError> {
    let command = commands
        .get(name)
        .ok_or_else(|| CommandError::UnknownCommand(name.to_string()))?;
    let settings = server.settings();

    let mut text = format!("{}\n{}", command.usage(&settings.command_prefix), command.help);
    if command.name == "emote" && !settings.icons.is_empty() {
        text.push_str("\nIcons:");
        for icon in &settings.icons {
            text.push_str("\n  ");
            text.push_str(icon);
        }
    }
    Ok(text)
}

// ---------------------------------------------------------------------------
// kick / broadcast
// ---------------------------------------------------------------------------

fn kick(env: &mut CommandEnv<'_>, args: &[CommandArg]) -> Result<(), CommandError> {
    env.require_op()?;
    let [arg] = args else {
        return Err(CommandError::ArgumentCount(1));
    };
    let (target, _) = env.connection(arg)?;
    if target == OP_ID {
        return Err(CommandError::failed("Cannot kick OP!"));
    }

    tracing::info!("#{} kicked #{target}", env.sender);
    env.server.disconnect_id(target);
    Ok(())
}

fn broadcast(env: &mut CommandEnv<'_>, args: &[CommandArg]) -> Result<(), CommandError> {
    env.require_op()?;
    let Some(text) = args.first().map(CommandArg::as_str) else {
        return Ok(());
    };
    env.server.broadcast_chat(env.sender, text);
    Ok(())
}

// ---------------------------------------------------------------------------
// tp
// ---------------------------------------------------------------------------

fn tp(env: &mut CommandEnv<'_>, args: &[CommandArg]) -> Result<(), CommandError> {
    let [arg] = args else {
        return Err(CommandError::ArgumentCount(1));
    };
    let (target, other) = env.player(arg)?;
    if other.status.sid.is_empty() {
        return Err(CommandError::failed("Player in menu!"));
    }
    if other.last_update.is_none() {
        return Err(CommandError::failed("Player position not known!"));
    }

    let caller = env.sender;
    let notice = env.send(format!("Teleporting to {}#{target}...", other.status.name));

    let own = env.caller_status();
    if own.sid == other.status.sid && own.mode == other.status.mode {
        finish_teleport(env.server, caller, target, None, notice);
        return Ok(());
    }

    // Entering another area needs the target's session.
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        return Err(CommandError::failed("Cannot query sessions right now!"));
    };
    let (guard, answer) = env.server.queries().register::<Session>(target);
    let request = Frame::about(caller).with_request(Request::of::<Session>());
    if !env.server.send_management(target, &request) {
        return Err(CommandError::QueryFailed(target));
    }

    let timeout = env.server.settings().session_query_timeout;
    let mailbox = env.server.mailbox().clone();
    runtime.spawn(async move {
        let _guard = guard;
        let outcome = match tokio::time::timeout(timeout, answer).await {
            Ok(Ok(frame)) => Ok(frame.session.filter(Session::in_session)),
            Ok(Err(_)) => Err(CommandError::QueryFailed(target)),
            Err(_) => Err(CommandError::QueryTimedOut(target)),
        };
        mailbox.defer(move |state| match outcome {
            Ok(session) => finish_teleport(state, caller, target, session, notice),
            Err(e) => {
                tracing::debug!("Teleport of #{caller} to #{target} failed: {e}");
                state.send_chat(caller, e.to_string());
            }
        });
    });
    Ok(())
}

/// Moves `caller` to `target`'s location and confirms in the same chat line.
fn finish_teleport(
    server: &mut ServerState,
    caller: u32,
    target: u32,
    session: Option<Session>,
    mut notice: Chat,
) {
    let Some(other) = server.player(target).cloned() else {
        notice.text = format!("Player #{target} left!");
        server.resend_chat(caller, &notice);
        return;
    };
    let name = server
        .player(caller)
        .map(|player| player.status.name.clone())
        .unwrap_or_else(|| format!("#{caller}"));

    let mut frame = Frame::about(caller).with_player(PlayerStatus {
        name,
        sid: other.status.sid.clone(),
        mode: other.status.mode,
        level: other.status.level.clone(),
    });
    frame.session = session;
    frame.update = other.last_update.clone();
    server.send_management(caller, &frame);

    tracing::info!("#{caller} teleported to #{target}");
    notice.text = format!("Teleported to {}#{target}", other.status.name);
    server.resend_chat(caller, &notice);
}

// ---------------------------------------------------------------------------
// emote
// ---------------------------------------------------------------------------

fn emote(env: &mut CommandEnv<'_>, args: &[CommandArg]) -> Result<(), CommandError> {
    let Some(value) = args.first().map(CommandArg::as_str) else {
        return Ok(());
    };
    let frame = Frame::about(env.sender).with_emote(Emote::new(value));
    env.server.parse(env.sender, frame);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use ghostnet_net::{Channel, LocalClient, LocalConnection};
    use ghostnet_proto::{AreaMode, SessionState, Update, Vec2};
    use tokio::sync::mpsc;

    use crate::state::{Mailbox, ServerEvent, ServerSettings};

    use super::*;

    struct Harness {
        state: ServerState,
        events: mpsc::UnboundedReceiver<ServerEvent>,
    }

    impl Harness {
        fn new() -> Self {
            let settings = ServerSettings {
                help_page_size: 2,
                session_query_timeout: Duration::from_millis(100),
                ..ServerSettings::default()
            };
            let (mailbox, events) = Mailbox::channel();
            let state = ServerState::new(settings, CommandRegistry::standard(), mailbox);
            Self { state, events }
        }

        fn join(&mut self, port: u16) -> LocalClient {
            let endpoint = SocketAddr::from(([10, 0, 0, 1], port));
            let (conn, mut client) = LocalConnection::pair(endpoint, self.state.mailbox().sink());
            self.state.accept(conn);
            client.drain();
            client
        }

        fn pump(&mut self) {
            while let Ok(event) = self.events.try_recv() {
                let _ = self.state.handle(event);
            }
        }

        async fn pump_until_idle(&mut self) {
            while let Ok(Some(event)) =
                tokio::time::timeout(Duration::from_millis(300), self.events.recv()).await
            {
                let _ = self.state.handle(event);
            }
        }
    }

    fn status(name: &str, sid: &str, level: &str) -> Frame {
        Frame::default().with_player(PlayerStatus {
            name: name.to_string(),
            sid: sid.to_string(),
            mode: AreaMode::Normal,
            level: level.to_string(),
        })
    }

    fn say(client: &LocalClient, text: &str) {
        let frame = Frame::default().with_chat(Chat::text(text));
        client.send_management(&frame).unwrap();
    }

    fn chats(client: &mut LocalClient) -> Vec<Chat> {
        client
            .drain()
            .into_iter()
            .filter_map(|(_, frame)| frame.chat)
            .collect()
    }

    #[tokio::test]
    async fn test_help_lists_first_page() {
        let mut h = Harness::new();
        let mut op = h.join(1);

        say(&op, "/help");
        h.pump();

        let replies = chats(&mut op);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].text, "/help [page] | [command]\n/kick <id>\nPage 1/3");
    }

    #[tokio::test]
    async fn test_help_page_and_range() {
        let mut h = Harness::new();
        let mut op = h.join(1);

        say(&op, "/help 2");
        say(&op, "/help 3");
        h.pump();

        let replies = chats(&mut op);
        assert_eq!(replies[0].text, "/emote <text> | i:<img> | p:<img>\nPage 3/3");
        assert_eq!(replies[1].text, "Page out of range!");
    }

    #[tokio::test]
    async fn test_help_for_one_command() {
        let mut h = Harness::new();
        let mut op = h.join(1);

        say(&op, "/help tp");
        say(&op, "/help fly");
        h.pump();

        let replies = chats(&mut op);
        assert_eq!(replies[0].text, "/tp <id>\nTeleport to another player.");
        assert_eq!(replies[1].text, "Command fly not found!");
    }

    #[tokio::test]
    async fn test_unknown_command_reports_error() {
        let mut h = Harness::new();
        let mut op = h.join(1);
        let mut other = h.join(2);

        say(&op, "/fly high");
        h.pump();

        assert_eq!(chats(&mut op)[0].text, "Command fly not found!");
        assert!(chats(&mut other).is_empty());
    }

    #[tokio::test]
    async fn test_kick_requires_op() {
        let mut h = Harness::new();
        let _op = h.join(1);
        let mut guest = h.join(2);
        let _victim = h.join(3);

        say(&guest, "/kick 2");
        h.pump();

        assert_eq!(chats(&mut guest)[0].text, "You're not OP!");
        assert!(h.state.connection(2).is_some());
    }

    #[tokio::test]
    async fn test_kick_by_op_disconnects_target() {
        let mut h = Harness::new();
        let mut op = h.join(1);
        let _victim = h.join(2);

        say(&op, "/kick 0");
        say(&op, "/kick 1");
        h.pump();

        assert!(h.state.connection(1).is_none());
        let frames = op.drain();
        assert!(frames.iter().any(|(_, f)| f.chat.as_ref().is_some_and(|c| c.text == "Cannot kick OP!")));
        assert!(frames.iter().any(|(_, f)| {
            f.player_id() == Some(1) && f.player.as_ref().is_some_and(PlayerStatus::is_departure)
        }));
    }

    #[tokio::test]
    async fn test_kick_argument_errors() {
        let mut h = Harness::new();
        let mut op = h.join(1);

        say(&op, "/kick");
        say(&op, "/kick abc");
        say(&op, "/kick 9");
        h.pump();

        let texts: Vec<_> = chats(&mut op).into_iter().map(|c| c.text).collect();
        assert_eq!(
            texts,
            vec![
                "Exactly 1 argument required!",
                "abc is not a player id!",
                "Player #9 not found!"
            ]
        );
    }

    #[tokio::test]
    async fn test_broadcast_requires_op() {
        let mut h = Harness::new();
        let mut op = h.join(1);
        let mut guest = h.join(2);

        say(&guest, "/broadcast hi all");
        h.pump();
        assert_eq!(chats(&mut guest)[0].text, "You're not OP!");
        assert!(chats(&mut op).is_empty());

        say(&op, "/broadcast hi   all");
        h.pump();
        for client in [&mut op, &mut guest] {
            let received = chats(client);
            assert_eq!(received.len(), 1);
            assert_eq!(received[0].text, "hi   all");
            assert_eq!(received[0].tag, "server");
        }
    }

    #[tokio::test]
    async fn test_emote_is_propagated() {
        let mut h = Harness::new();
        let mut a = h.join(1);
        let mut b = h.join(2);

        say(&a, "/emote i:hearts");
        h.pump();

        for client in [&mut a, &mut b] {
            let frames = client.drain();
            assert_eq!(frames.len(), 1);
            let emote = frames[0].1.emote.as_ref().unwrap();
            assert_eq!(emote.value, "i:hearts");
            assert_eq!(frames[0].1.player_id(), Some(0));
        }
    }

    fn update(index: u32, x: f32) -> Frame {
        Frame::default().with_update(Update::at(index, Vec2::new(x, 8.0)))
    }

    #[tokio::test]
    async fn test_tp_errors() {
        let mut h = Harness::new();
        let mut a = h.join(1);
        let b = h.join(2);
        let c = h.join(3);

        b.send_management(&status("B", "", "")).unwrap();
        c.send_management(&status("C", "Celeste/1", "a-00")).unwrap();
        h.pump();
        a.drain();

        say(&a, "/tp");
        say(&a, "/tp 1");
        say(&a, "/tp 2");
        h.pump();

        let texts: Vec<_> = chats(&mut a).into_iter().map(|c| c.text).collect();
        assert_eq!(
            texts,
            vec![
                "Exactly 1 argument required!",
                "Player in menu!",
                "Player position not known!"
            ]
        );
    }

    #[tokio::test]
    async fn test_tp_same_area_skips_session_query() {
        let mut h = Harness::new();
        let mut a = h.join(1);
        let mut b = h.join(2);

        a.send_management(&status("A", "Celeste/1", "a-00")).unwrap();
        b.send_management(&status("B", "Celeste/1", "a-05")).unwrap();
        b.send_update(&update(4, 120.0)).unwrap();
        h.pump();
        a.drain();
        b.drain();

        say(&a, "/tp 1");
        h.pump();

        let frames = a.drain();
        let teleport = frames
            .iter()
            .map(|(_, f)| f)
            .find(|f| f.player.is_some())
            .unwrap();
        let moved = teleport.player.as_ref().unwrap();
        assert_eq!(moved.name, "A");
        assert_eq!(moved.level, "a-05");
        assert!(teleport.session.is_none());
        assert_eq!(teleport.update.as_ref().unwrap().position, Vec2::new(120.0, 8.0));

        let notices: Vec<_> = frames.iter().filter_map(|(_, f)| f.chat.clone()).collect();
        assert_eq!(notices.len(), 2);
        assert_eq!(notices[0].text, "Teleporting to B#1...");
        assert_eq!(notices[1].text, "Teleported to B#1");
        assert_eq!(notices[0].id, notices[1].id);
        assert!(b.drain().iter().all(|(_, f)| f.request.is_none()));
    }

    #[tokio::test]
    async fn test_tp_other_area_uses_session_reply() {
        let mut h = Harness::new();
        let mut a = h.join(1);
        let mut b = h.join(2);

        a.send_management(&status("A", "Celeste/1", "a-00")).unwrap();
        b.send_management(&status("B", "Celeste/2", "b-00")).unwrap();
        b.send_update(&update(1, 40.0)).unwrap();
        h.pump();
        a.drain();
        b.drain();

        say(&a, "/tp 1");
        h.pump();

        let (channel, request) = b.recv().await.unwrap();
        assert_eq!(channel, Channel::Management);
        assert!(request.request.unwrap().wants::<Session>());
        assert_eq!(request.head.unwrap().player_id, 0);

        let reply = Frame::default().with_session(Session {
            state: Some(SessionState {
                deaths: 3,
                ..Default::default()
            }),
        });
        b.send_management(&reply).unwrap();
        h.pump_until_idle().await;

        let teleport = a
            .drain()
            .into_iter()
            .map(|(_, f)| f)
            .find(|f| f.session.is_some())
            .unwrap();
        assert_eq!(teleport.session.unwrap().state.unwrap().deaths, 3);
        assert_eq!(teleport.player.unwrap().sid, "Celeste/2");
        assert!(h.state.queries().is_empty());
    }

    #[tokio::test]
    async fn test_tp_query_times_out() {
        let mut h = Harness::new();
        let mut a = h.join(1);
        let b = h.join(2);

        a.send_management(&status("A", "Celeste/1", "a-00")).unwrap();
        b.send_management(&status("B", "Celeste/2", "b-00")).unwrap();
        b.send_update(&update(1, 40.0)).unwrap();
        h.pump();
        a.drain();

        say(&a, "/tp 1");
        h.pump_until_idle().await;

        let texts: Vec<_> = chats(&mut a).into_iter().map(|c| c.text).collect();
        assert_eq!(texts.last().unwrap(), "Player #1 didn't respond in time!");
        assert!(h.state.queries().is_empty());
    }
}
