//! Runtime configuration
//!
//! `ChatConfig` carries the session settings; `Args` fills it from the
//! command line, with environment variable fallbacks.

use std::time::Duration;

use clap::Parser;

/// Default server address
pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";

/// Inactivity window before a user stops being shown as typing
pub const DEFAULT_TYPING_DEBOUNCE_MS: u64 = 1000;

/// Per-connection outbound backlog; a client this far behind is treated as stalled
pub const DEFAULT_CLIENT_BUFFER: usize = 1024;

/// Channel buffer size for server commands
pub const DEFAULT_COMMAND_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    pub addr: String,
    pub typing_debounce: Duration,
    pub client_buffer: usize,
    pub command_buffer: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            typing_debounce: Duration::from_millis(DEFAULT_TYPING_DEBOUNCE_MS),
            client_buffer: DEFAULT_CLIENT_BUFFER,
            command_buffer: DEFAULT_COMMAND_BUFFER,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "chat_session")]
#[command(about = "Single-room real-time WebSocket chat server", long_about = None)]
pub struct Args {
    /// Address to bind the server to
    #[arg(short, long, env = "CHAT_ADDR", default_value = DEFAULT_ADDR)]
    pub addr: String,

    /// Milliseconds of inactivity before a typing flag is cleared
    #[arg(long, env = "CHAT_TYPING_DEBOUNCE_MS", default_value_t = DEFAULT_TYPING_DEBOUNCE_MS)]
    pub typing_debounce_ms: u64,

    /// Outbound backlog per connection before the client counts as stalled and is disconnected
    #[arg(long, env = "CHAT_CLIENT_BUFFER", default_value_t = DEFAULT_CLIENT_BUFFER)]
    pub client_buffer: usize,

    /// Command queue size of the session actor
    #[arg(long, env = "CHAT_COMMAND_BUFFER", default_value_t = DEFAULT_COMMAND_BUFFER)]
    pub command_buffer: usize,
}

impl From<Args> for ChatConfig {
    fn from(args: Args) -> Self {
        Self {
            addr: args.addr,
            typing_debounce: Duration::from_millis(args.typing_debounce_ms),
            // mpsc channels panic on a zero capacity
            client_buffer: args.client_buffer.max(1),
            command_buffer: args.command_buffer.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ChatConfig::from(Args::try_parse_from(["chat_session"]).unwrap());
        assert_eq!(config, ChatConfig::default());
        assert_eq!(config.typing_debounce, Duration::from_millis(1000));
    }

    #[test]
    fn test_overrides() {
        let args = Args::try_parse_from([
            "chat_session",
            "--addr",
            "0.0.0.0:9000",
            "--typing-debounce-ms",
            "250",
            "--client-buffer",
            "0",
        ])
        .unwrap();
        let config = ChatConfig::from(args);

        assert_eq!(config.addr, "0.0.0.0:9000");
        assert_eq!(config.typing_debounce, Duration::from_millis(250));
        assert_eq!(config.client_buffer, 1);
    }
}
