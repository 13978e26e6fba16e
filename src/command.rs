use serde::Serialize;

/// Where a command's magnets are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    /// The configured BitTorrent client.
    Torrent,
    /// The Xunlei cloud drive.
    Xunlei,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    PluginAction,
}

/// A registered chat command.
#[derive(Debug, Clone, Serialize)]
pub struct CommandSpec {
    pub command: &'static str,
    pub event: EventKind,
    pub description: &'static str,
    pub action: &'static str,
    pub route: Route,
}

impl CommandSpec {
    /// Payload attached to events raised by this command.
    #[must_use]
    pub fn payload(&self) -> serde_json::Value {
        serde_json::json!({ "action": self.action })
    }

    /// Command name without the leading slash.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.command.trim_start_matches('/')
    }
}

const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "/dm",
        event: EventKind::PluginAction,
        description: "Download a magnet link",
        action: "download_magnet",
        route: Route::Torrent,
    },
    CommandSpec {
        command: "/magnet",
        event: EventKind::PluginAction,
        description: "Add a magnet link to the torrent client",
        action: "magnet_download",
        route: Route::Torrent,
    },
    CommandSpec {
        command: "/xunlei",
        event: EventKind::PluginAction,
        description: "Add a magnet link to Xunlei",
        action: "xunlei_download",
        route: Route::Xunlei,
    },
    CommandSpec {
        command: "/xl",
        event: EventKind::PluginAction,
        description: "Add a magnet link to Xunlei",
        action: "xunlei_download",
        route: Route::Xunlei,
    },
];

#[must_use]
pub fn registered_commands() -> &'static [CommandSpec] {
    COMMANDS
}

/// Route handling events with the given action, if any command raises it.
#[must_use]
pub fn route_for_action(action: &str) -> Option<Route> {
    COMMANDS
        .iter()
        .find(|spec| spec.action == action)
        .map(|spec| spec.route)
}

/// An event delivered by a chat front-end or the message bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub action: String,
    pub arg: Option<String>,
    pub channel: Option<String>,
    pub user: Option<String>,
}

impl InboundEvent {
    /// Turn a `/command argument` message into the event its command raises.
    ///
    /// Returns `None` for text that is not one of the registered commands.
    #[must_use]
    pub fn from_text(text: &str, channel: Option<String>, user: Option<String>) -> Option<Self> {
        let body = text.trim_start().strip_prefix('/')?;
        let (cmd, arg) = match body.split_once(char::is_whitespace) {
            Some((c, a)) => (c, a.trim()),
            None => (body, ""),
        };
        // Telegram appends the bot name in groups: `/dm@magrelay_bot`.
        let cmd = cmd.split_once('@').map_or(cmd, |(c, _)| c);

        let spec = COMMANDS.iter().find(|spec| spec.name() == cmd)?;

        Some(Self {
            action: spec.action.to_string(),
            arg: (!arg.is_empty()).then(|| arg.to_string()),
            channel,
            user,
        })
    }
}
