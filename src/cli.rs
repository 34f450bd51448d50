// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines the server command and the client subcommands with their arguments.

use clap::{Args, Parser, Subcommand, ValueEnum};
use dockhand::config::DEFAULT_ADDR;
use dockhand::transfer::ChunkSize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dockhand")]
#[command(about = "Remote container management for Docker-compatible runtimes")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = Format::Normal)]
    pub output: Format,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Normal,
    Quiet,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the server against the local container engine
    Serve(ServeArgs),

    /// Manage images
    #[command(subcommand)]
    Image(ImageCommand),

    /// Manage containers
    #[command(subcommand)]
    Container(ContainerCommand),

    /// Manage volumes
    #[command(subcommand)]
    Volume(VolumeCommand),
}

#[derive(Args)]
pub struct ServeArgs {
    /// Config file (default: discover dockhand.yml in the current directory)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    pub addr: Option<String>,

    /// Container engine endpoint (unix://, tcp:// or http://)
    #[arg(long)]
    pub docker_host: Option<String>,

    /// Upload chunk size in bytes
    #[arg(long)]
    pub chunk_size: Option<ChunkSize>,
}

/// Connection settings shared by every client command.
#[derive(Args, Clone)]
pub struct Endpoint {
    /// Server address
    #[arg(short, long, default_value = DEFAULT_ADDR)]
    pub server: String,

    /// Registry username
    #[arg(long)]
    pub username: Option<String>,

    /// Registry password
    #[arg(long)]
    pub password: Option<String>,

    /// Registry server
    #[arg(long)]
    pub registry: Option<String>,

    /// Give up on the call after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

#[derive(Args)]
pub struct ImageArg {
    /// Image name
    pub image: String,

    /// Image tag
    #[arg(short, long, default_value = "latest")]
    pub tag: String,
}

#[derive(Args)]
pub struct ListArgs {
    /// Filter as key=value; may be repeated
    #[arg(short, long = "filter")]
    pub filters: Vec<String>,

    /// Return at most this many rows
    #[arg(long)]
    pub limit: Option<u32>,

    /// Include stopped or intermediate entries
    #[arg(short, long)]
    pub all: bool,
}

#[derive(Subcommand)]
pub enum ImageCommand {
    /// Pull an image from its registry
    Pull {
        #[command(flatten)]
        image: ImageArg,
        #[command(flatten)]
        endpoint: Endpoint,
    },

    /// Upload an image tarball to the server
    Push {
        #[command(flatten)]
        image: ImageArg,

        /// Tarball to upload (as produced by `docker save`)
        #[arg(long)]
        file: PathBuf,

        #[command(flatten)]
        endpoint: Endpoint,
    },

    /// List images
    List {
        #[command(flatten)]
        list: ListArgs,
        #[command(flatten)]
        endpoint: Endpoint,
    },

    /// Remove an image
    Remove {
        #[command(flatten)]
        image: ImageArg,

        /// Remove even if containers use it
        #[arg(long)]
        force: bool,

        #[command(flatten)]
        endpoint: Endpoint,
    },
}

#[derive(Args)]
pub struct RunArgs {
    /// Container instance name
    #[arg(long)]
    pub instance: String,

    /// Command to run in the container
    #[arg(long, default_value = "/bin/bash")]
    pub command: String,

    /// Environment variable KEY=VALUE; may be repeated
    #[arg(short, long)]
    pub env: Vec<String>,

    /// Port mapping CONTAINER_PORT:HOST_PORT; may be repeated
    #[arg(short, long)]
    pub port: Vec<String>,

    /// Volume NAME:MOUNTPOINT[:ro]; may be repeated
    #[arg(long)]
    pub volume: Vec<String>,

    /// Device SRC[:DST[:PERMISSIONS]]; may be repeated
    #[arg(long)]
    pub device: Vec<String>,

    /// Network to attach to
    #[arg(long)]
    pub network: Option<String>,

    /// Run as USER[:GROUP]
    #[arg(long)]
    pub user: Option<String>,

    /// Restart policy (no, always, unless-stopped, on-failure[:N])
    #[arg(long)]
    pub restart: Option<String>,

    /// Capability to add; may be repeated
    #[arg(long)]
    pub cap_add: Vec<String>,

    /// Capability to drop; may be repeated
    #[arg(long)]
    pub cap_drop: Vec<String>,
}

#[derive(Subcommand)]
pub enum ContainerCommand {
    /// Create and start a container
    Start {
        #[command(flatten)]
        image: ImageArg,
        #[command(flatten)]
        run: RunArgs,
        #[command(flatten)]
        endpoint: Endpoint,
    },

    /// Replace a running container with a new one
    Update {
        #[command(flatten)]
        image: ImageArg,
        #[command(flatten)]
        run: RunArgs,

        /// Return once the replacement exists
        #[arg(long = "async")]
        async_mode: bool,

        #[command(flatten)]
        endpoint: Endpoint,
    },

    /// Stop a container
    Stop {
        /// Container instance name
        instance: String,

        /// Seconds to wait before killing
        #[arg(long)]
        time: Option<u64>,

        #[command(flatten)]
        endpoint: Endpoint,
    },

    /// Remove a container
    Remove {
        /// Container instance name
        instance: String,

        /// Remove even if running
        #[arg(long)]
        force: bool,

        #[command(flatten)]
        endpoint: Endpoint,
    },

    /// List containers
    List {
        #[command(flatten)]
        list: ListArgs,
        #[command(flatten)]
        endpoint: Endpoint,
    },

    /// Show container details
    Inspect {
        /// Container instance name
        instance: String,
        #[command(flatten)]
        endpoint: Endpoint,
    },

    /// Print container logs
    Logs {
        /// Container instance name
        instance: String,

        /// Keep streaming new lines
        #[arg(short, long)]
        follow: bool,

        /// Only the last N lines
        #[arg(long)]
        tail: Option<u64>,

        #[command(flatten)]
        endpoint: Endpoint,
    },
}

#[derive(Subcommand)]
pub enum VolumeCommand {
    /// Create a volume
    Create {
        /// Volume name
        name: String,

        /// Volume driver
        #[arg(long)]
        driver: Option<String>,

        /// Label KEY=VALUE; may be repeated
        #[arg(long)]
        label: Vec<String>,

        /// Driver option KEY=VALUE; may be repeated
        #[arg(short, long)]
        opt: Vec<String>,

        #[command(flatten)]
        endpoint: Endpoint,
    },

    /// Remove a volume
    Remove {
        /// Volume name
        name: String,

        /// Remove even if in use
        #[arg(long)]
        force: bool,

        #[command(flatten)]
        endpoint: Endpoint,
    },

    /// List volumes
    List {
        #[command(flatten)]
        list: ListArgs,
        #[command(flatten)]
        endpoint: Endpoint,
    },
}
