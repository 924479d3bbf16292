use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "stemgenre", version, about = "Music genre classification from separated stems")]
pub struct Cli {
    /// Config file (defaults to ./stemgenre.toml or the user config directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Trained four-input genre model (ONNX)
    #[arg(long, env = "MODEL_PATH", global = true)]
    pub model: Option<PathBuf>,

    /// Directory holding mean.npy and std.npy
    #[arg(long, env = "STATS_DIR", global = true)]
    pub stats_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Separate a track and write its stem features as JSON
    Process {
        /// Input audio file (WAV, MP3, FLAC, OGG)
        input: PathBuf,

        /// Output JSON file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Use stems already separated into this directory
        #[arg(long)]
        stems_dir: Option<PathBuf>,
    },

    /// Classify features written by `process`
    Predict {
        /// Features JSON (`preprocessedData` or `data`)
        input: PathBuf,

        /// Output JSON file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run the full pipeline on one or more tracks
    Classify {
        /// Input audio files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Use stems already separated into this directory
        #[arg(long)]
        stems_dir: Option<PathBuf>,

        /// Number of genres to list per track
        #[arg(long, default_value_t = 3)]
        top: usize,
    },

    /// Start the HTTP service
    Serve {
        #[arg(long, env = "HOST")]
        host: Option<String>,

        #[arg(long, env = "PORT")]
        port: Option<u16>,
    },
}
