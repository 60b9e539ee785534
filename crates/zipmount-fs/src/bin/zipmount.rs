//! zipmount: work on files inside zip archives as if they were folders.
//!
//! Each command mounts the archives along its paths, runs the operation and
//! closes the mounts again, writing a new archive when anything changed.
//!
//! # Usage
//!
//! ```bash
//! zipmount ls project.zip/src
//! zipmount put notes.txt project.zip/docs/notes.txt
//! zipmount mv project.zip/docs/notes.txt other.zip/notes.txt
//! zipmount cat project.zip/vendor/lib.jar/META-INF/MANIFEST.MF
//! ```

use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{error, info, warn};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use zipmount_fs::{
    normalize_host_path, FileInfo, FileStore, Vfs, VfsConfig, VfsError, VfsResult,
};

/// Mount zip archives as folders for one command.
#[derive(Parser, Debug)]
#[command(name = "zipmount")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List a directory, archive or folder inside an archive
    Ls {
        path: PathBuf,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Print a directory tree
    Tree { path: PathBuf },
    /// Write a file to stdout
    Cat { path: PathBuf },
    /// Copy a host file (or stdin with `-`) to a path
    Put {
        source: PathBuf,
        dest: PathBuf,
        /// Append instead of replacing
        #[arg(short, long)]
        append: bool,
    },
    /// Create a directory and missing parents
    Mkdir { path: PathBuf },
    /// Delete a file or directory
    Rm {
        path: PathBuf,
        /// Delete non-empty directories
        #[arg(short, long)]
        recursive: bool,
    },
    /// Move or rename, also between archives
    Mv { from: PathBuf, to: PathBuf },
    /// Copy, also between archives
    Cp { from: PathBuf, to: PathBuf },
    /// Open an archive and decode every entry
    Check { archive: PathBuf },
    /// Print the effective configuration
    Config,
}

fn main() {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    let config = match &args.config {
        Some(path) => match VfsConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load config {}: {}", path.display(), e);
                process::exit(1);
            }
        },
        None => VfsConfig::default(),
    };

    if let Err(e) = run(args.command, config) {
        error!("{}", e);
        process::exit(1);
    }
}

fn run(command: Command, config: VfsConfig) -> VfsResult<()> {
    if let Command::Config = command {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    let vfs = Vfs::new(config);
    let mut session = Session::new(&vfs);
    let result = execute(&mut session, command);
    let closed = session.close();
    result.and(closed)
}

fn execute(session: &mut Session<'_>, command: Command) -> VfsResult<()> {
    match command {
        Command::Ls { path, json } => {
            let path = session.mount_through(&path, true)?;
            let children = session.vfs.children(&path)?;
            if json {
                let text = serde_json::to_string_pretty(&children)
                    .map_err(|e| VfsError::Io(io::Error::other(e)))?;
                println!("{text}");
            } else {
                for child in &children {
                    println!("{}", format_row(child));
                }
            }
        }
        Command::Tree { path } => {
            let path = session.mount_through(&path, true)?;
            println!("{}", path.display());
            print_tree(session.vfs, &path, "")?;
        }
        Command::Cat { path } => {
            let path = session.mount_through(&path, false)?;
            let mut reader = session.vfs.open_read(&path)?;
            let stdout = io::stdout();
            let mut out = stdout.lock();
            io::copy(&mut reader, &mut out)?;
            out.flush()?;
        }
        Command::Put {
            source,
            dest,
            append,
        } => {
            let data = if source == Path::new("-") {
                let mut data = Vec::new();
                io::stdin().read_to_end(&mut data)?;
                data
            } else {
                fs::read(&source)?
            };
            let dest = session.mount_through(&dest, false)?;
            let mut sink = session.vfs.open_write(&dest, !append)?;
            sink.write_all(&data)?;
            sink.commit()?;
            info!("Wrote {} bytes to {}", data.len(), dest.display());
        }
        Command::Mkdir { path } => {
            let path = session.mount_through(&path, false)?;
            session.vfs.mkdir(&path)?;
        }
        Command::Rm { path, recursive } => {
            let path = session.mount_through(&path, false)?;
            session.vfs.delete(&path, recursive)?;
        }
        Command::Mv { from, to } => {
            let from = session.mount_through(&from, false)?;
            let to = session.mount_through(&to, false)?;
            session.vfs.move_path(&from, &to)?;
        }
        Command::Cp { from, to } => {
            let from = session.mount_through(&from, false)?;
            let to = session.mount_through(&to, false)?;
            session.vfs.copy_path(&from, &to)?;
        }
        Command::Check { archive } => {
            let root = session.mount_through(&archive, true)?;
            let (files, bytes) = check_tree(session.vfs, &root)?;
            println!("{}: {} files, {} bytes, all entries readable", root.display(), files, bytes);
        }
        Command::Config => {}
    }
    Ok(())
}

/// Mounts opened for the current command, outermost first.
struct Session<'a> {
    vfs: &'a Vfs,
    opened: Vec<PathBuf>,
}

impl<'a> Session<'a> {
    fn new(vfs: &'a Vfs) -> Self {
        Self {
            vfs,
            opened: Vec::new(),
        }
    }

    /// Open every archive file on the way to `path`, including `path` itself
    /// when `include_target` is set.
    fn mount_through(&mut self, path: &Path, include_target: bool) -> VfsResult<PathBuf> {
        let path = normalize_host_path(path)?;
        let mut candidates: Vec<&Path> = path.ancestors().skip(1).collect();
        candidates.reverse();
        if include_target {
            candidates.push(path.as_path());
        }

        for candidate in candidates {
            if !self.vfs.registry().config().is_archive_name(candidate)
                || self.vfs.registry().is_mounted(candidate)
            {
                continue;
            }
            match self.vfs.stat(candidate) {
                Ok(info) if info.is_file() => {
                    self.vfs.open(candidate)?;
                    self.opened.push(candidate.to_path_buf());
                }
                Ok(_) => {}
                Err(e) if e.is_not_found() => break,
                Err(e) => return Err(e),
            }
        }
        Ok(path)
    }

    /// Close top-level mounts; nested ones are flushed by their parents.
    fn close(self) -> VfsResult<()> {
        let mut first_error = None;
        for root in &self.opened {
            let Some(mount) = self.vfs.registry().get(root) else {
                continue;
            };
            if mount.is_nested() {
                continue;
            }
            if let Err(e) = self.vfs.close(root) {
                warn!("Failed to close {}: {}", root.display(), e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

fn format_row(info: &FileInfo) -> String {
    let kind = if info.is_dir() { 'd' } else { '-' };
    let modified = info
        .modified
        .map(|time| time.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default();
    format!("{kind} {:>10} {:19} {}", info.size, modified, info.name)
}

fn print_tree(vfs: &Vfs, dir: &Path, prefix: &str) -> VfsResult<()> {
    let children = vfs.children(dir)?;
    let count = children.len();
    for (i, child) in children.iter().enumerate() {
        let last = i + 1 == count;
        let branch = if last { "└── " } else { "├── " };
        let suffix = if child.is_dir() { "/" } else { "" };
        println!("{prefix}{branch}{}{suffix}", child.name);
        if child.is_dir() {
            let nested = format!("{prefix}{}", if last { "    " } else { "│   " });
            print_tree(vfs, &dir.join(&child.name), &nested)?;
        }
    }
    Ok(())
}

fn check_tree(vfs: &Vfs, dir: &Path) -> VfsResult<(usize, u64)> {
    let mut files = 0;
    let mut bytes = 0;
    for child in vfs.children(dir)? {
        let path = dir.join(&child.name);
        if child.is_dir() {
            let (f, b) = check_tree(vfs, &path)?;
            files += f;
            bytes += b;
        } else {
            bytes += io::copy(&mut vfs.open_read(&path)?, &mut io::sink())?;
            files += 1;
        }
    }
    Ok((files, bytes))
}
