// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Command-line front end for libmq queues.
//
// Usage:
//   mq_demo create /jobs --max-messages 16 --message-size 256
//   mq_demo send /jobs "hello" --priority 3
//   mq_demo recv /jobs --timeout-ms 5000
//   mq_demo info /jobs
//   mq_demo unlink /jobs
//
// Ctrl-C interrupts a blocked send or receive.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, SystemTime};

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use libmq::{MessageQueue, MqAttr, MqError, OpenOptions};

#[derive(Parser, Debug)]
#[command(name = "mq_demo", version, about = "Create, use and inspect libmq message queues")]
struct Cli {
    /// Directory holding queue files (defaults to $LIBMQ_DIR or /dev/shm/mqueue)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Fail instead of blocking on a full or empty queue
    #[arg(long, global = true)]
    nonblocking: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a queue (fails if it already exists)
    Create {
        name: String,
        #[arg(long, default_value_t = libmq::DEFAULT_MAX_MESSAGES)]
        max_messages: usize,
        #[arg(long, default_value_t = libmq::DEFAULT_MESSAGE_SIZE)]
        message_size: usize,
        /// Permission bits of the queue file, in octal
        #[arg(long, default_value = "600", value_parser = parse_mode)]
        mode: u32,
    },
    /// Send one message
    Send {
        name: String,
        message: String,
        #[arg(short, long, default_value_t = 0)]
        priority: u32,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Receive messages and print them
    Recv {
        name: String,
        /// Number of messages to receive
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Print queue attributes
    Info { name: String },
    /// Remove a queue
    Unlink { name: String },
}

fn parse_mode(s: &str) -> Result<u32, String> {
    u32::from_str_radix(s, 8).map_err(|e| format!("invalid octal mode {s:?}: {e}"))
}

fn deadline(timeout_ms: Option<u64>) -> Option<SystemTime> {
    timeout_ms.map(|ms| SystemTime::now() + Duration::from_millis(ms))
}

fn options(cli: &Cli) -> OpenOptions {
    let mut opts = OpenOptions::new();
    opts.nonblocking(cli.nonblocking);
    if let Some(dir) = &cli.dir {
        opts.dir(dir);
    }
    opts
}

fn print_attr(name: &str, attr: &MqAttr) {
    println!("queue:            {name}");
    println!("max messages:     {}", attr.max_messages);
    println!("message size:     {}", attr.message_size);
    println!("current messages: {}", attr.current_messages);
    println!("nonblocking:      {}", attr.nonblocking);
}

fn run(cli: &Cli) -> libmq::Result<()> {
    match &cli.command {
        Command::Create {
            name,
            max_messages,
            message_size,
            mode,
        } => {
            let q = options(cli)
                .create(true)
                .exclusive(true)
                .mode(*mode)
                .attr(MqAttr::new(*max_messages, *message_size))
                .open(name)?;
            info!("created {} at {}", name, q.path().display());
            print_attr(name, &q.getattr()?);
            q.close()
        }
        Command::Send {
            name,
            message,
            priority,
            timeout_ms,
        } => {
            let q = options(cli).open(name)?;
            match deadline(*timeout_ms) {
                Some(d) => q.timedsend(message.as_bytes(), *priority, d)?,
                None => q.send(message.as_bytes(), *priority)?,
            }
            info!("sent {} bytes at priority {}", message.len(), priority);
            q.close()
        }
        Command::Recv {
            name,
            count,
            timeout_ms,
        } => {
            let q = options(cli).open(name)?;
            let mut buf = vec![0u8; q.getattr()?.message_size];
            for _ in 0..*count {
                let (len, prio) = match deadline(*timeout_ms) {
                    Some(d) => q.timedreceive(&mut buf, d)?,
                    None => q.receive(&mut buf)?,
                };
                println!("[{prio}] {}", String::from_utf8_lossy(&buf[..len]));
            }
            q.close()
        }
        Command::Info { name } => {
            let q = options(cli).open(name)?;
            print_attr(name, &q.getattr()?);
            q.close()
        }
        Command::Unlink { name } => match &cli.dir {
            Some(dir) => MessageQueue::unlink_in(dir, name),
            None => MessageQueue::unlink(name),
        },
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    install_interrupt_handler();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(MqError::Interrupted) => {
            eprintln!("interrupted");
            ExitCode::from(130)
        }
        Err(e) => {
            error!("{:?}", e);
            eprintln!("mq_demo: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Route SIGINT / SIGTERM into `libmq::raise` so blocked calls return.
fn install_interrupt_handler() {
    #[cfg(unix)]
    {
        extern "C" fn handler(_: libc::c_int) {
            libmq::raise();
        }
        unsafe {
            libc::signal(libc::SIGINT, handler as *const () as libc::sighandler_t);
            libc::signal(libc::SIGTERM, handler as *const () as libc::sighandler_t);
        }
    }
}
