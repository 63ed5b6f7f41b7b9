use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay server, pairing connected users for private chats.
    Server(ServerArgs),
    /// Connect to a relay server as a terminal user.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Socket address the server should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub listen: SocketAddr,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Username to join with; must not already be online.
    #[arg(long)]
    pub username: String,

    /// Address of the relay server to connect to.
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub server: SocketAddr,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_defaults_to_local_port_5000() {
        let cli = Cli::try_parse_from(["relay", "server"]).expect("parse");
        match cli.command {
            Command::Server(args) => assert_eq!(args.listen.to_string(), "127.0.0.1:5000"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn client_requires_username() {
        assert!(Cli::try_parse_from(["relay", "client"]).is_err());
        let cli = Cli::try_parse_from(["relay", "client", "--username", "alice"]).expect("parse");
        match cli.command {
            Command::Client(args) => assert_eq!(args.username, "alice"),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
