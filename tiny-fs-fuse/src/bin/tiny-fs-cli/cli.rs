use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tiny_fs::TierLayout;

#[derive(Parser)]
pub struct Cli {
    /// Disk image holding the volume
    #[arg(long, short)]
    pub image: PathBuf,

    /// Number of buffer cache slots
    #[arg(long, default_value_t = 1)]
    pub cache_slots: usize,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a fresh volume, replacing the image
    Format {
        /// Total blocks, including super block and inode area
        #[arg(long, default_value_t = 4096)]
        blocks: u32,

        #[arg(long, default_value_t = 256)]
        inodes: u32,

        /// Inode references per tier: direct,single,double,triple
        #[arg(long, default_value = "0,8,0,0", value_parser = parse_layout)]
        layout: TierLayout,
    },

    /// Copy a host file into the volume
    Put {
        host: PathBuf,
        path: String,

        /// Key for slot encoding
        #[arg(long)]
        key: Option<String>,
    },

    /// Print a file to stdout
    Cat {
        path: String,

        #[arg(long)]
        key: Option<String>,
    },

    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },

    Mkdir {
        path: String,
    },

    /// Remove a file name
    Rm {
        path: String,
    },

    /// Remove an empty directory
    Rmdir {
        path: String,
    },

    /// Add a hard link to a regular file
    Ln {
        existing: String,
        new: String,
    },

    Stat {
        path: String,
    },

    /// Show free blocks and inodes
    Df,

    /// Copy every regular file of a host directory into a volume directory
    Pack {
        /// Host source directory
        #[arg(long, short)]
        source: PathBuf,

        /// Directory inside the volume
        #[arg(long, short, default_value = "/")]
        dest: String,
    },
}

fn parse_layout(s: &str) -> Result<TierLayout, String> {
    s.parse()
        .map_err(|err| format!("invalid tier layout {s:?}: {err}"))
}
