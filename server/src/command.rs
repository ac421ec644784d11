//! Named, permission-gated commands.

use std::fmt;
use std::sync::Arc;

use log::info;
use protocol::block::BlockId;

use crate::server::Server;
use crate::session::Session;

/// Who issued a command.
#[derive(Clone)]
pub enum CommandSender {
    Console,
    Player(Arc<Session>),
}

impl CommandSender {
    pub fn name(&self) -> &str {
        match self {
            CommandSender::Console => "Console",
            CommandSender::Player(session) => session.name(),
        }
    }

    /// Replies to the sender: chat for players, the log for the console.
    pub fn send_message(&self, text: &str) {
        match self {
            CommandSender::Console => info!("{}", text),
            CommandSender::Player(session) => session.send_message(text),
        }
    }
}

impl fmt::Debug for CommandSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandSender::Console => f.write_str("Console"),
            CommandSender::Player(session) => write!(f, "Player({})", session.name()),
        }
    }
}

pub type CommandHandler = dyn Fn(&Arc<Server>, &CommandSender, &Command, &str) + Send + Sync;

pub struct Command {
    pub name: String,
    pub description: String,
    /// Permission a sender needs, if any.
    pub permission: Option<String>,
    handler: Box<CommandHandler>,
}

impl Command {
    pub fn new<F>(name: &str, description: &str, permission: Option<&str>, handler: F) -> Self
    where
        F: Fn(&Arc<Server>, &CommandSender, &Command, &str) + Send + Sync + 'static,
    {
        Self {
            name: name.to_lowercase(),
            description: description.to_string(),
            permission: permission.map(str::to_string),
            handler: Box::new(handler),
        }
    }

    pub fn run(&self, server: &Arc<Server>, sender: &CommandSender, args: &str) {
        (self.handler)(server, sender, self, args)
    }
}

/// Splits a command line into the lower-cased command name and its argument text.
pub fn parse_command_line(line: &str) -> (String, &str) {
    let line = line.trim();
    match line.split_once(' ') {
        Some((name, args)) => (name.to_lowercase(), args.trim()),
        None => (line.to_lowercase(), ""),
    }
}

/// Whether a set of granted permissions covers `permission`.
///
/// A grant of `*` covers everything and `prefix.*` covers anything below `prefix`.
pub fn permission_granted(granted: &[String], permission: &str) -> bool {
    granted.iter().any(|grant| {
        grant == "*"
            || grant == permission
            || grant
                .strip_suffix(".*")
                .is_some_and(|prefix| {
                    permission
                        .strip_prefix(prefix)
                        .is_some_and(|rest| rest.starts_with('.'))
                })
    })
}

pub fn builtin_commands() -> Vec<Command> {
    vec![
        Command::new(
            "help",
            "Lists the commands you can use",
            Some("server.help"),
            |server, sender, _, _| {
                let mut commands = server.commands();
                commands.sort_by(|a, b| a.name.cmp(&b.name));
                sender.send_message("Commands:");
                for command in commands {
                    let allowed = command
                        .permission
                        .as_deref()
                        .map_or(true, |perm| server.has_permission(sender, perm));
                    if allowed {
                        sender.send_message(&format!(
                            "/{} - {}",
                            command.name, command.description
                        ));
                    }
                }
            },
        ),
        Command::new(
            "list",
            "Shows who is online",
            Some("server.list"),
            |server, sender, _, _| {
                let mut names: Vec<String> = server
                    .clients()
                    .players()
                    .iter()
                    .map(|p| p.name().to_string())
                    .collect();
                names.sort();
                sender.send_message(&format!(
                    "Online ({}/{}): {}",
                    names.len(),
                    server.clients().max_players(),
                    names.join(", ")
                ));
            },
        ),
        Command::new(
            "plugins",
            "Lists the enabled plugins",
            Some("server.plugins"),
            |server, sender, _, _| {
                let names = server.plugin_names();
                sender.send_message(&format!("Plugins ({}): {}", names.len(), names.join(", ")));
            },
        ),
        Command::new(
            "save",
            "Saves every loaded level",
            Some("server.save"),
            |server, sender, _, _| {
                let saved = server.save_all_levels();
                sender.send_message(&format!("Saved {} level(s)", saved));
            },
        ),
        Command::new(
            "op",
            "Makes a player an operator",
            Some("server.op"),
            |server, sender, _, args| set_operator(server, sender, args, true),
        ),
        Command::new(
            "deop",
            "Takes operator status away",
            Some("server.op"),
            |server, sender, _, args| set_operator(server, sender, args, false),
        ),
        Command::new(
            "hold",
            "Puts a block in your hand",
            Some("server.hold"),
            |_, sender, command, args| {
                let CommandSender::Player(session) = sender else {
                    sender.send_message("Only players can hold blocks");
                    return;
                };
                let block = match args.parse::<BlockId>() {
                    Ok(block) if block <= session.max_block() => block,
                    _ => {
                        sender.send_message(&format!("Usage: /{} <block id>", command.name));
                        return;
                    }
                };
                if !session.hold_block(block, false) {
                    sender.send_message("Your client cannot be handed blocks");
                }
            },
        ),
    ]
}

fn set_operator(server: &Arc<Server>, sender: &CommandSender, name: &str, operator: bool) {
    if name.is_empty() || name.contains(' ') {
        sender.send_message(if operator {
            "Usage: /op <name>"
        } else {
            "Usage: /deop <name>"
        });
        return;
    }
    if server.set_operator(name, operator) {
        sender.send_message(&format!(
            "{} is {} an operator",
            name,
            if operator { "now" } else { "no longer" }
        ));
    } else {
        sender.send_message("Nothing changed");
    }
}
