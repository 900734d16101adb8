//! # linefix
//!
//! A CLI tool that finds and fixes files that do not end with a trailing
//! newline byte.
//!
//! ## Overview
//!
//! `linefix` walks a directory tree (skipping `.git`) and checks the last byte
//! of every file. A file is fine when its final byte is a line feed (`0x0A`)
//! or a carriage return (`0x0D`). Everything else, including empty files, is
//! reported as affected. In `fix` mode one carriage return byte is appended to
//! each affected file.
//!
//! ## Pipeline
//!
//! ```text
//! root → Enumerate (sorted, .git pruned) → for each file:
//!                                            - read last byte
//!                                            - affected? record it
//!                                            - fix mode? append 0x0D
//!                                        → Report (human or JSON)
//! ```
//!
//! ## Exit Codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | Success |
//! | 1 | General error (directory not found, permission denied, I/O error) |
//! | 2 | Invalid command-line arguments |
//! | 3 | `scan --check`: affected files were found |
//! | 4 | `fix`: one or more files could not be fixed |
//! | 130 | Interrupted by Ctrl+C |

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use anyhow::{Context, Result};
use clap::ValueEnum;
use clap::error::ErrorKind;
use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser, Subcommand};
use clap_complete::Shell;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use rich_rust::terminal;
use rich_rust::{ColorSystem, Console};
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, IsTerminal, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

// ─────────────────────────────────────────────────────────────────────────────
// Exit Codes
// ─────────────────────────────────────────────────────────────────────────────

/// Semantic exit codes for scripting and CI integration
mod exit_codes {
    /// Success - completed without errors
    pub const SUCCESS: i32 = 0;
    /// General error (directory not found, permission denied, I/O error)
    pub const ERROR: i32 = 1;
    /// Invalid command-line arguments
    pub const INVALID_ARGS: i32 = 2;
    /// `scan --check` found files without a trailing newline
    pub const AFFECTED: i32 = 3;
    /// `fix` could not append a terminator to at least one file
    pub const FIX_FAILED: i32 = 4;
    /// Run stopped by Ctrl+C
    pub const INTERRUPTED: i32 = 130;
}

#[derive(Debug)]
struct ArgError(String);

impl fmt::Display for ArgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ArgError {}

/// Directory traversal failed. Fatal to the whole run.
#[derive(Debug)]
struct EnumerationError {
    path: PathBuf,
    source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl EnumerationError {
    fn new(
        path: impl Into<PathBuf>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        Self {
            path: path.into(),
            source: source.into(),
        }
    }
}

impl fmt::Display for EnumerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to enumerate {}", self.path.display())
    }
}

impl std::error::Error for EnumerationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.source)
    }
}

/// The last byte of a file could not be determined.
#[derive(Debug)]
struct CheckError {
    path: PathBuf,
    source: io::Error,
}

impl fmt::Display for CheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to read last byte of {}", self.path.display())
    }
}

impl std::error::Error for CheckError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// A terminator byte could not be appended to a file.
#[derive(Debug)]
struct FixError {
    path: PathBuf,
    source: io::Error,
}

impl fmt::Display for FixError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to append terminator to {}", self.path.display())
    }
}

impl std::error::Error for FixError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

#[derive(Debug, Default)]
struct RunOutcome {
    check: bool,
    affected: bool,
    fix_failed: bool,
    cancelled: bool,
}

impl RunOutcome {
    fn exit_code(&self) -> i32 {
        if self.cancelled {
            exit_codes::INTERRUPTED
        } else if self.fix_failed {
            exit_codes::FIX_FAILED
        } else if self.check && self.affected {
            exit_codes::AFFECTED
        } else {
            exit_codes::SUCCESS
        }
    }
}

fn error_chain_has<T: std::error::Error + 'static>(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<T>())
}

fn exit_code_for_error(err: &anyhow::Error) -> i32 {
    if error_chain_has::<ArgError>(err) {
        exit_codes::INVALID_ARGS
    } else {
        exit_codes::ERROR
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CLI Arguments
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ColorMode {
    /// Auto-detect color support
    Auto,
    /// Always emit colors (even when not a TTY)
    Always,
    /// Never emit colors
    Never,
}

/// Finds and fixes files that do not end with a trailing newline
#[derive(Parser, Debug)]
#[command(
    name = "linefix",
    version,
    about,
    long_about = None,
    arg_required_else_help = true,
    after_help = "EXIT CODES:\n  0    Success\n  1    General error (directory not found, permission denied, I/O error)\n  2    Invalid command-line arguments\n  3    scan --check: affected files were found\n  4    fix: one or more files could not be fixed\n  130  Interrupted\n"
)]
struct Args {
    /// Log per-file diagnostics and a summary in addition to the report
    #[arg(
        short = 'v',
        long,
        global = true,
        env = "LINEFIX_VERBOSE",
        value_parser = clap::builder::FalseyValueParser::new()
    )]
    verbose: bool,

    /// Color output: auto, always, or never
    #[arg(long, value_enum, default_value = "auto", global = true)]
    color: ColorMode,

    /// Output results as JSON for programmatic processing
    #[arg(long, global = true)]
    json: bool,

    /// Glob patterns for file names to skip (comma-separated)
    #[arg(long, value_name = "GLOBS", global = true)]
    exclude: Option<String>,

    /// Path to config file (default: search for .linefixrc)
    #[arg(long = "config", value_name = "FILE", global = true)]
    config_file: Option<PathBuf>,

    /// Ignore config files
    #[arg(long = "no-config", global = true)]
    no_config: bool,

    /// Set when `--verbose` was typed rather than taken from LINEFIX_VERBOSE
    #[arg(skip)]
    verbose_from_cli: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Args {
    /// Parse arguments, rejecting `--json --verbose` only when both were given
    /// on the command line. A verbose value from the environment yields to
    /// `--json` instead of failing the run.
    fn parse_args_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let matches = Self::command().try_get_matches_from(itr)?;
        let mut args = Self::from_arg_matches(&matches)?;
        args.verbose_from_cli = verbose_from_command_line(&matches);

        if args.json && args.verbose_from_cli {
            return Err(Self::command().error(
                ErrorKind::ArgumentConflict,
                "the argument '--json' cannot be used with '--verbose'",
            ));
        }
        Ok(args)
    }
}

/// Global args are propagated into subcommand matches, so check every level
fn verbose_from_command_line(matches: &ArgMatches) -> bool {
    let mut current = Some(matches);
    while let Some(m) = current {
        if m.value_source("verbose") == Some(ValueSource::CommandLine) {
            return true;
        }
        current = m.subcommand().map(|(_, sub)| sub);
    }
    false
}

// ─────────────────────────────────────────────────────────────────────────────
// Subcommands
// ─────────────────────────────────────────────────────────────────────────────

/// Available subcommands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Report files in a directory tree that do not end with a newline
    Scan {
        /// Directory to scan recursively
        #[arg(value_name = "DIRECTORY", default_value = ".")]
        directory: PathBuf,

        /// Exit with code 3 when any file is affected
        #[arg(long)]
        check: bool,
    },
    /// Append a carriage return to files that do not end with a newline
    Fix {
        /// Directory to fix recursively
        #[arg(value_name = "DIRECTORY", default_value = ".")]
        directory: PathBuf,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Generate a shell completion script on stdout
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
    /// Print the version
    Version,
}

/// Config management actions
#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Initialize a new .linefixrc config file
    Init {
        /// Create in home directory instead of current
        #[arg(long)]
        global: bool,
    },
    /// Show effective configuration (merged file + CLI)
    Show,
    /// Show path to active config file
    Path,
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration and Logging
// ─────────────────────────────────────────────────────────────────────────────

/// Runtime configuration derived from CLI args
#[derive(Debug)]
struct Config {
    color: ColorMode,
    verbose: bool,
    json: bool,
    exclude: Vec<String>,
}

impl From<&Args> for Config {
    fn from(args: &Args) -> Self {
        Self {
            color: args.color,
            verbose: args.verbose && !args.json,
            json: args.json,
            exclude: args
                .exclude
                .as_deref()
                .map(split_patterns)
                .unwrap_or_default(),
        }
    }
}

fn split_patterns(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}

struct VerboseStyle {
    use_color: bool,
}

impl VerboseStyle {
    fn new(use_color: bool) -> Self {
        Self { use_color }
    }

    fn wrap(&self, tag: &str, text: impl fmt::Display) -> String {
        if self.use_color {
            format!("[{}]{}[/]", tag, text)
        } else {
            text.to_string()
        }
    }

    fn affected(&self, text: impl fmt::Display) -> String {
        self.wrap("yellow", text)
    }

    fn success(&self, text: impl fmt::Display) -> String {
        self.wrap("green", text)
    }

    fn failure(&self, text: impl fmt::Display) -> String {
        self.wrap("bold red", text)
    }

    fn dim(&self, text: impl fmt::Display) -> String {
        self.wrap("dim", text)
    }

    fn stat_label(&self, text: impl fmt::Display) -> String {
        self.wrap("bold blue", text)
    }

    fn separator(&self) -> String {
        self.wrap("dim", "───")
    }
}

fn build_console(color: ColorMode) -> (Console, VerboseStyle) {
    match color {
        ColorMode::Never => (Console::new(), VerboseStyle::new(false)),
        ColorMode::Always => {
            let system = terminal::detect_color_system().unwrap_or(ColorSystem::Standard);
            let console = Console::builder()
                .force_terminal(true)
                .color_system(system)
                .build();
            (console, VerboseStyle::new(true))
        }
        ColorMode::Auto => {
            if std::env::var("NO_COLOR").is_ok() {
                return (Console::new(), VerboseStyle::new(false));
            }

            if std::env::var("FORCE_COLOR").is_ok() {
                let system = terminal::detect_color_system().unwrap_or(ColorSystem::Standard);
                let console = Console::builder()
                    .force_terminal(true)
                    .color_system(system)
                    .build();
                return (console, VerboseStyle::new(true));
            }

            let console = Console::new();
            let use_color = console.is_color_enabled();
            (console, VerboseStyle::new(use_color))
        }
    }
}

/// Diagnostics sink, built once from the effective configuration and passed
/// to everything that reports.
struct Logger {
    console: Console,
    styles: VerboseStyle,
    verbose: bool,
    progress: ProgressBar,
}

impl Logger {
    fn new(color: ColorMode, verbose: bool) -> Self {
        let (console, styles) = build_console(color);
        Self {
            console,
            styles,
            verbose,
            progress: ProgressBar::hidden(),
        }
    }

    /// Draw a progress bar on stderr for the per-file loop
    fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Verbose line that embeds user-supplied text `raw` (a path or a glob)
    fn debug_verbatim(&self, raw: impl AsRef<OsStr>, message: impl fmt::Display) {
        if self.verbose {
            let line = message.to_string();
            let raw = raw.as_ref();
            self.progress
                .suspend(|| self.print_verbatim(&self.styles.dim(&line), &line, &[raw]));
        }
    }

    fn print(&self, message: &str) {
        self.console.print(message);
    }

    /// Print `styled` through the console, or `plain` verbatim when any of
    /// `raw` could be read as a style tag.
    fn print_verbatim(&self, styled: &str, plain: &str, raw: &[&OsStr]) {
        if raw.iter().any(|text| contains_markup(text)) {
            let _ = writeln!(io::stdout().lock(), "{}", plain);
        } else {
            self.console.print(styled);
        }
    }
}

/// rich_rust treats `[...]` as a style tag
fn contains_markup(text: &OsStr) -> bool {
    text.to_string_lossy().contains('[')
}

/// The bar is only drawn for human output on an interactive stderr. Verbose
/// lines would interleave with it, so verbose runs go without.
fn progress_enabled(json: bool, verbose: bool, stderr_is_terminal: bool) -> bool {
    !json && !verbose && stderr_is_terminal
}

fn build_progress(mode: Mode, enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr());
    if let Ok(style) = ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len} files") {
        bar.set_style(style.progress_chars("=> "));
    }
    bar.set_message(match mode {
        Mode::Scan => "Scanning",
        Mode::Fix => "Fixing",
    });
    bar
}

/// Write a completion script for `shell`
fn write_completions(shell: Shell, out: &mut dyn Write) {
    let mut cmd = Args::command();
    let name = cmd.get_name().to_string();
    clap_complete::generate(shell, &mut cmd, name, out);
}

// ─────────────────────────────────────────────────────────────────────────────
// Config File Support
// ─────────────────────────────────────────────────────────────────────────────

/// Config file names searched in order
const CONFIG_FILENAMES: &[&str] = &[".linefixrc", ".linefixrc.toml", "linefixrc.toml"];

/// Configuration loaded from a .linefixrc file
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    /// Show verbose diagnostics
    verbose: Option<bool>,
    /// Color mode: auto, always, never
    color: Option<ColorMode>,
    /// Output as JSON
    json: Option<bool>,
    /// File name globs to skip
    exclude: Option<Vec<String>>,
}

/// Search for a config file starting from the given directory
fn find_config_file(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir.to_path_buf();

    loop {
        for filename in CONFIG_FILENAMES {
            let config_path = current.join(filename);
            if config_path.is_file() {
                return Some(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    if let Some(home) = dirs::home_dir() {
        for filename in CONFIG_FILENAMES {
            let config_path = home.join(filename);
            if config_path.is_file() {
                return Some(config_path);
            }
        }
    }

    None
}

/// Load and parse a config file
fn load_config_file(path: &Path) -> Result<FileConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Directory to start config discovery from
fn config_search_start(directory: &Path) -> PathBuf {
    let absolute = if directory.is_absolute() {
        directory.to_path_buf()
    } else {
        std::env::current_dir().unwrap_or_default().join(directory)
    };

    if absolute.is_dir() {
        absolute
    } else {
        absolute
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }
}

/// Locate the config file that applies to `directory`, honoring --config
fn resolve_config_path(args: &Args, directory: &Path) -> Result<Option<PathBuf>> {
    if let Some(ref path) = args.config_file {
        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
        }
        return Ok(Some(path.clone()));
    }

    Ok(find_config_file(&config_search_start(directory)))
}

/// Create Config by merging file config with CLI args (CLI wins)
fn create_config(args: &Args, directory: &Path) -> Result<Config> {
    let mut config = Config::from(args);

    if args.no_config {
        return Ok(config);
    }

    let Some(path) = resolve_config_path(args, directory)? else {
        return Ok(config);
    };
    let file_config = load_config_file(&path)?;
    merge_file_config(&mut config, args, file_config);

    Ok(config)
}

fn merge_file_config(config: &mut Config, args: &Args, file_config: FileConfig) {
    // verbose and json are mutually exclusive; an explicit CLI choice blocks
    // the file from turning on the other one.
    if !args.json && !args.verbose {
        if let Some(j) = file_config.json {
            config.json = j;
        }
    }

    if !args.verbose && !config.json {
        if let Some(v) = file_config.verbose {
            config.verbose = v;
        }
    }

    if args.color == ColorMode::Auto {
        if let Some(c) = file_config.color {
            config.color = c;
        }
    }

    if args.exclude.is_none() {
        if let Some(patterns) = file_config.exclude {
            config.exclude = patterns;
        }
    }
}

/// Default config file content
const DEFAULT_CONFIG: &str = r#"# .linefixrc - linefix configuration file

# Output options
# verbose = false
# color = "auto"
# json = false

# File name globs to skip while walking
# exclude = ["*.png", "*.lock"]
"#;

/// Handle the config subcommand
fn run_config_command(action: &ConfigAction, args: &Args) -> Result<()> {
    match action {
        ConfigAction::Init { global } => {
            let path = if *global {
                dirs::home_dir()
                    .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?
                    .join(".linefixrc")
            } else {
                PathBuf::from(".linefixrc")
            };

            if path.exists() {
                return Err(anyhow::anyhow!(
                    "Config file already exists: {}",
                    path.display()
                ));
            }

            fs::write(&path, DEFAULT_CONFIG)
                .with_context(|| format!("Failed to create config file: {}", path.display()))?;

            eprintln!("Created config file: {}", path.display());
            Ok(())
        }

        ConfigAction::Show => {
            let cwd = Path::new(".");
            let config = create_config(args, cwd)?;

            eprintln!("Effective configuration:");
            eprintln!("  verbose: {}", config.verbose);
            eprintln!("  color: {:?}", config.color);
            eprintln!("  json: {}", config.json);
            eprintln!("  exclude: {:?}", config.exclude);

            if !args.no_config {
                if let Some(path) = resolve_config_path(args, cwd)? {
                    eprintln!();
                    eprintln!("Config file: {}", path.display());
                }
            }

            Ok(())
        }

        ConfigAction::Path => match resolve_config_path(args, Path::new("."))? {
            Some(path) => {
                println!("{}", path.display());
                Ok(())
            }
            None => anyhow::bail!("No config file found"),
        },
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File Enumeration
// ─────────────────────────────────────────────────────────────────────────────

/// Directory name that is never entered or reported
const METADATA_DIR: &str = ".git";

fn is_metadata_dir(path: &Path, is_dir: bool) -> bool {
    is_dir && path.file_name().is_some_and(|name| name == METADATA_DIR)
}

fn build_globset(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }

    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|err| ArgError(format!("Invalid glob pattern '{}': {}", pattern, err)))?;
        builder.add(glob);
    }

    builder
        .build()
        .map(Some)
        .map_err(|err| ArgError(format!("Invalid glob set: {}", err)).into())
}

/// Best-effort path for a walker error
fn walk_error_path(err: &ignore::Error) -> Option<PathBuf> {
    match err {
        ignore::Error::WithPath { path, .. } => Some(path.clone()),
        ignore::Error::WithDepth { err, .. } | ignore::Error::WithLineNumber { err, .. } => {
            walk_error_path(err)
        }
        ignore::Error::Loop { child, .. } => Some(child.clone()),
        ignore::Error::Partial(errs) => errs.iter().find_map(walk_error_path),
        _ => None,
    }
}

/// Recursively list every non-directory entry under `root`.
///
/// Entries are ordered depth-first and sorted by file name within each
/// directory. Any `.git` directory is pruned together with its contents.
/// Paths keep `root` as their prefix exactly as given. Names matching
/// `excludes` are dropped. The first traversal error aborts the walk.
fn enumerate_files(
    root: &Path,
    excludes: Option<&GlobSet>,
) -> Result<Vec<PathBuf>, EnumerationError> {
    let metadata = fs::metadata(root).map_err(|err| EnumerationError::new(root, err))?;
    if is_metadata_dir(root, metadata.is_dir()) {
        return Ok(Vec::new());
    }

    let mut walker = WalkBuilder::new(root);
    walker
        .standard_filters(false)
        .hidden(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(|entry| {
            let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
            !is_metadata_dir(entry.path(), is_dir)
        });

    let mut files = Vec::new();
    for entry in walker.build() {
        let entry = entry.map_err(|err| {
            let path = walk_error_path(&err).unwrap_or_else(|| root.to_path_buf());
            EnumerationError::new(path, err)
        })?;

        if entry.file_type().is_some_and(|ft| ft.is_dir()) {
            continue;
        }

        if let Some(globs) = excludes {
            if entry.path().file_name().is_some_and(|name| globs.is_match(name)) {
                continue;
            }
        }

        files.push(entry.into_path());
    }

    Ok(files)
}

// ─────────────────────────────────────────────────────────────────────────────
// Newline Check and Fix
// ─────────────────────────────────────────────────────────────────────────────

/// Byte appended by `fix`
const FIX_TERMINATOR: u8 = b'\r';

/// Check if a byte is accepted as a line terminator
fn is_terminator(byte: u8) -> bool {
    byte == b'\n' || byte == b'\r'
}

/// Result of inspecting the end of one file
#[derive(Debug)]
enum CheckOutcome {
    /// Last byte is CR or LF
    Terminated,
    /// Last byte is something else, or the file is empty
    Missing,
    /// Last byte could not be read; treated as missing
    Unreadable(CheckError),
}

impl CheckOutcome {
    fn has_trailing_newline(&self) -> bool {
        matches!(self, CheckOutcome::Terminated)
    }
}

fn not_a_regular_file() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, "not a regular file")
}

/// Read the final byte of a file. `None` means the file is empty.
fn read_last_byte(path: &Path) -> Result<Option<u8>, CheckError> {
    let check_err = |source: io::Error| CheckError {
        path: path.to_path_buf(),
        source,
    };

    // Opening a FIFO or device for reading can block, so refuse early.
    let metadata = fs::metadata(path).map_err(check_err)?;
    if !metadata.is_file() {
        return Err(check_err(not_a_regular_file()));
    }

    let mut file = File::open(path).map_err(check_err)?;
    let len = file.metadata().map_err(check_err)?.len();
    if len == 0 {
        return Ok(None);
    }

    file.seek(SeekFrom::Start(len - 1)).map_err(check_err)?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).map_err(check_err)?;
    Ok(Some(last[0]))
}

fn check_newline(path: &Path) -> CheckOutcome {
    match read_last_byte(path) {
        Ok(Some(byte)) if is_terminator(byte) => CheckOutcome::Terminated,
        Ok(_) => CheckOutcome::Missing,
        Err(err) => CheckOutcome::Unreadable(err),
    }
}

/// Append exactly one carriage return. Never creates the file.
///
/// Not guarded against double application: calling this twice appends two
/// bytes. Callers only invoke it right after a failed check.
fn append_terminator(path: &Path) -> Result<(), FixError> {
    let fix_err = |source: io::Error| FixError {
        path: path.to_path_buf(),
        source,
    };

    let metadata = fs::metadata(path).map_err(fix_err)?;
    if !metadata.is_file() {
        return Err(fix_err(not_a_regular_file()));
    }

    let mut file = OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(fix_err)?;
    file.write_all(&[FIX_TERMINATOR]).map_err(fix_err)
}

// ─────────────────────────────────────────────────────────────────────────────
// Scan/Fix Orchestration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum Mode {
    Scan,
    Fix,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Scan => write!(f, "scan"),
            Mode::Fix => write!(f, "fix"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum FileStatus {
    /// Last byte is not a terminator, or the file is empty
    MissingNewline,
    /// Last byte could not be read
    Unreadable,
    /// Terminator appended
    Fixed,
    /// Terminator could not be appended
    FixFailed,
}

/// A file that failed the newline check
#[derive(Debug)]
struct AffectedFile {
    path: PathBuf,
    status: FileStatus,
    /// I/O error text for `Unreadable` and `FixFailed`
    detail: Option<String>,
}

/// Everything one scan or fix run produced
#[derive(Debug)]
struct RunReport {
    mode: Mode,
    root: PathBuf,
    files_scanned: usize,
    /// In enumeration order
    affected: Vec<AffectedFile>,
    check_errors: usize,
    cancelled: bool,
    elapsed: Duration,
}

impl RunReport {
    fn new(mode: Mode, root: &Path) -> Self {
        Self {
            mode,
            root: root.to_path_buf(),
            files_scanned: 0,
            affected: Vec::new(),
            check_errors: 0,
            cancelled: false,
            elapsed: Duration::ZERO,
        }
    }

    fn fixed(&self) -> impl Iterator<Item = &AffectedFile> {
        self.affected
            .iter()
            .filter(|f| f.status == FileStatus::Fixed)
    }

    fn failed(&self) -> impl Iterator<Item = &AffectedFile> {
        self.affected
            .iter()
            .filter(|f| f.status == FileStatus::FixFailed)
    }

    fn has_failures(&self) -> bool {
        self.failed().next().is_some()
    }

    /// Calculate files checked per second
    fn files_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.files_scanned as f64 / secs
        } else {
            self.files_scanned as f64
        }
    }
}

/// Check one file; `None` when it already ends with a terminator
fn inspect_file(path: &Path, logger: &Logger) -> Option<AffectedFile> {
    match check_newline(path) {
        CheckOutcome::Terminated => {
            logger.debug_verbatim(path, format!("{}: ok", path.display()));
            None
        }
        CheckOutcome::Missing => {
            logger.debug_verbatim(
                path,
                format!("{}: missing trailing newline", path.display()),
            );
            Some(AffectedFile {
                path: path.to_path_buf(),
                status: FileStatus::MissingNewline,
                detail: None,
            })
        }
        CheckOutcome::Unreadable(err) => {
            logger.debug_verbatim(path, format!("{}: {}", err, err.source));
            Some(AffectedFile {
                path: path.to_path_buf(),
                status: FileStatus::Unreadable,
                detail: Some(err.source.to_string()),
            })
        }
    }
}

fn repair_file(mut affected: AffectedFile, logger: &Logger) -> AffectedFile {
    match append_terminator(&affected.path) {
        Ok(()) => {
            logger.debug_verbatim(
                &affected.path,
                format!("{}: appended carriage return", affected.path.display()),
            );
            affected.status = FileStatus::Fixed;
        }
        Err(err) => {
            logger.debug_verbatim(&affected.path, format!("{}: {}", err, err.source));
            affected.status = FileStatus::FixFailed;
            affected.detail = Some(err.source.to_string());
        }
    }
    affected
}

/// Enumerate `root` once, then check (and in fix mode repair) every file in
/// order. Stops early when `cancel` is set; files fixed so far stay fixed.
fn run_linefix(
    mode: Mode,
    root: &Path,
    excludes: Option<&GlobSet>,
    logger: &Logger,
    cancel: &AtomicBool,
) -> Result<RunReport, EnumerationError> {
    let start = Instant::now();
    let mut report = RunReport::new(mode, root);

    let files = enumerate_files(root, excludes)?;
    logger.debug_verbatim(
        root,
        format!("Found {} file(s) under {}", files.len(), root.display()),
    );
    logger.progress.set_length(files.len() as u64);

    for path in &files {
        if cancel.load(Ordering::SeqCst) {
            report.cancelled = true;
            logger.debug_verbatim(path, format!("Interrupted before {}", path.display()));
            break;
        }
        logger.progress.inc(1);

        report.files_scanned += 1;
        let Some(affected) = inspect_file(path, logger) else {
            continue;
        };
        if affected.status == FileStatus::Unreadable {
            report.check_errors += 1;
        }

        let affected = match mode {
            Mode::Scan => affected,
            Mode::Fix => repair_file(affected, logger),
        };
        report.affected.push(affected);
    }
    logger.progress.finish_and_clear();

    report.elapsed = start.elapsed();
    Ok(report)
}

// ─────────────────────────────────────────────────────────────────────────────
// Reporting
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct JsonOutput {
    version: &'static str,
    command: Mode,
    status: &'static str,
    root: String,
    files_scanned: usize,
    affected_count: usize,
    fixed_count: usize,
    failed_count: usize,
    files: Vec<JsonFile>,
}

#[derive(Serialize)]
struct JsonFile {
    path: String,
    status: FileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

fn report_status(report: &RunReport) -> &'static str {
    if report.cancelled {
        "cancelled"
    } else if report.affected.is_empty() {
        "clean"
    } else {
        match report.mode {
            Mode::Scan => "affected",
            Mode::Fix if report.has_failures() => "partial",
            Mode::Fix => "fixed",
        }
    }
}

fn json_output(report: &RunReport) -> JsonOutput {
    JsonOutput {
        version: "1.0",
        command: report.mode,
        status: report_status(report),
        root: report.root.display().to_string(),
        files_scanned: report.files_scanned,
        affected_count: report.affected.len(),
        fixed_count: report.fixed().count(),
        failed_count: report.failed().count(),
        files: report
            .affected
            .iter()
            .map(|f| JsonFile {
                path: f.path.display().to_string(),
                status: f.status,
                detail: f.detail.clone(),
            })
            .collect(),
    }
}

fn print_json_report(report: &RunReport) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(&json_output(report))
            .context("Failed to serialize JSON output")?
    );
    Ok(())
}

/// Human-readable report: counts through the console, one path per line
fn print_report(report: &RunReport, logger: &Logger) -> Result<()> {
    let styles = &logger.styles;
    let root = report.root.display();

    match report.mode {
        Mode::Scan => {
            logger.print_verbatim(
                &format!(
                    "{} file(s) affected by newline issues in {} and subdirectories:",
                    styles.affected(report.affected.len()),
                    styles.affected(&root)
                ),
                &format!(
                    "{} file(s) affected by newline issues in {} and subdirectories:",
                    report.affected.len(),
                    root
                ),
                &[report.root.as_os_str()],
            );
            let mut stdout = io::stdout().lock();
            for file in &report.affected {
                writeln!(stdout, "{}", file.path.display())?;
            }
            stdout.flush()?;
        }
        Mode::Fix => {
            logger.print_verbatim(
                &format!(
                    "{} file(s) fixed newline issues in {} and subdirectories:",
                    styles.success(report.fixed().count()),
                    styles.success(&root)
                ),
                &format!(
                    "{} file(s) fixed newline issues in {} and subdirectories:",
                    report.fixed().count(),
                    root
                ),
                &[report.root.as_os_str()],
            );
            {
                let mut stdout = io::stdout().lock();
                for file in report.fixed() {
                    writeln!(stdout, "{}", file.path.display())?;
                }
                stdout.flush()?;
            }

            if report.has_failures() {
                logger.print(&format!(
                    "{} file(s) could not be fixed:",
                    styles.failure(report.failed().count())
                ));
                let mut stdout = io::stdout().lock();
                for file in report.failed() {
                    writeln!(
                        stdout,
                        "{}: {}",
                        file.path.display(),
                        file.detail.as_deref().unwrap_or("unknown error")
                    )?;
                }
                stdout.flush()?;
            }
        }
    }

    if report.cancelled {
        eprintln!(
            "Interrupted: stopped after {} file(s); results are partial",
            report.files_scanned
        );
    }

    Ok(())
}

/// Print a statistics summary (verbose only)
fn print_stats_summary(report: &RunReport, logger: &Logger) {
    let styles = &logger.styles;
    logger.print("");
    logger.print(&format!(
        "{} Summary {}",
        styles.separator(),
        styles.separator()
    ));

    logger.print(&format!(
        "  {} {} scanned, {} affected",
        styles.stat_label("Files:"),
        report.files_scanned,
        report.affected.len()
    ));

    if report.mode == Mode::Fix {
        logger.print(&format!(
            "  {} {} fixed, {} failed",
            styles.stat_label("Fixes:"),
            report.fixed().count(),
            report.failed().count()
        ));
    }

    if report.check_errors > 0 {
        logger.print(&format!(
            "  {} {}",
            styles.failure("Unreadable:"),
            report.check_errors
        ));
    }

    let elapsed_ms = report.elapsed.as_secs_f64() * 1000.0;
    logger.print(&format!(
        "  {} {:.2}ms ({:.0} files/sec)",
        styles.stat_label("Time:"),
        elapsed_ms,
        report.files_per_second()
    ));

    logger.print("");
}

// ─────────────────────────────────────────────────────────────────────────────
// Entry Point
// ─────────────────────────────────────────────────────────────────────────────

fn main() {
    let args = match Args::parse_args_from(std::env::args_os()) {
        Ok(args) => args,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => exit_codes::SUCCESS,
                _ => exit_codes::INVALID_ARGS,
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };

    let exit_code = match run(&args) {
        Ok(outcome) => outcome.exit_code(),
        Err(err) => {
            eprintln!("Error: {:#}", err);
            exit_code_for_error(&err)
        }
    };

    std::process::exit(exit_code);
}

fn run(args: &Args) -> Result<RunOutcome> {
    match &args.command {
        Commands::Scan { directory, check } => run_mode(args, Mode::Scan, directory, *check),
        Commands::Fix { directory } => run_mode(args, Mode::Fix, directory, false),
        Commands::Config { action } => {
            run_config_command(action, args)?;
            Ok(RunOutcome::default())
        }
        Commands::Completion { shell } => {
            let mut stdout = io::stdout().lock();
            write_completions(*shell, &mut stdout);
            stdout.flush().context("Failed to write completion script")?;
            Ok(RunOutcome::default())
        }
        Commands::Version => {
            println!("Version: {}", env!("CARGO_PKG_VERSION"));
            Ok(RunOutcome::default())
        }
    }
}

/// Set up Ctrl+C so the current file finishes before the run stops
fn install_interrupt_handler() -> Result<Arc<AtomicBool>> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;
    Ok(cancel)
}

fn run_mode(args: &Args, mode: Mode, directory: &Path, check: bool) -> Result<RunOutcome> {
    let config = create_config(args, directory)?;
    let excludes = build_globset(&config.exclude)?;
    let show_progress = progress_enabled(config.json, config.verbose, io::stderr().is_terminal());
    let logger = Logger::new(config.color, config.verbose)
        .with_progress(build_progress(mode, show_progress));

    logger.debug_verbatim(
        directory,
        format!("Running {} on {}", mode, directory.display()),
    );
    if !config.exclude.is_empty() {
        let patterns = config.exclude.join(", ");
        logger.debug_verbatim(&patterns, format!("Excluding: {}", patterns));
    }

    let cancel = install_interrupt_handler()?;
    let report = run_linefix(mode, directory, excludes.as_ref(), &logger, &cancel)?;

    if config.json {
        print_json_report(&report)?;
    } else {
        print_report(&report, &logger)?;
    }

    if config.verbose {
        print_stats_summary(&report, &logger);
    }

    Ok(RunOutcome {
        check,
        affected: !report.affected.is_empty(),
        fix_failed: report.has_failures(),
        cancelled: report.cancelled,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
