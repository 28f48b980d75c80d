use argh::FromArgs;

#[derive(FromArgs, PartialEq, Debug)]
/// Run three processes of the distributed-algorithms stack against a hub.
pub struct Args {
    #[argh(positional)]
    /// hub host
    pub hub_host: String,
    #[argh(positional)]
    /// hub port
    pub hub_port: u16,
    #[argh(positional)]
    /// host the processes listen on
    pub host: String,
    #[argh(positional)]
    /// listening port of process 1
    pub port1: u16,
    #[argh(positional)]
    /// listening port of process 2
    pub port2: u16,
    #[argh(positional)]
    /// listening port of process 3
    pub port3: u16,
    #[argh(positional)]
    /// owner alias reported to the hub
    pub owner: String,
    #[argh(option, default = "100")]
    /// failure detector heartbeat interval in milliseconds (default 100)
    pub heartbeat_ms: u64,
    #[argh(option, default = "2000")]
    /// timeout for outbound connections in milliseconds (default 2000)
    pub connect_timeout_ms: u64,
    #[argh(option)]
    /// tracing filter directives, overriding RUST_LOG
    pub log: Option<String>,
}
