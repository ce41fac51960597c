use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

#[derive(Parser)]
#[command(
    name = "sixgress",
    about = "SOCKS5 proxy with a rotating IPv6 egress source",
    version
)]
pub struct Cli {
    /// Ingress listen address
    #[arg(short, long, default_value = "[::]:1080")]
    pub listen: SocketAddr,

    /// YAML credential file: a `users` mapping of usernames to passwords
    #[arg(long, default_value = "users.yaml")]
    pub users_file: PathBuf,

    /// JSON prefix file: a `subnets` list of IPv6 CIDR blocks
    #[arg(long, default_value = "subnets.json")]
    pub subnets_file: PathBuf,

    /// Egress interface carrying the local prefix routes
    #[arg(short, long, default_value = "eth0")]
    pub interface: String,

    /// Redraw the active /48 pool after this many emitted source addresses
    #[arg(long, default_value_t = 10_000)]
    pub rotation_limit: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}
