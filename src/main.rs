// src/main.rs
//
// Command line entry point. Loads settings, opens the archive and hands the
// engine to the terminal console.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use forthwire_lib::archive::{
    ArchiveBackend, ArchiveWriter, Archivist, Direction, EventKind, RqliteArchive, SqliteArchive,
    StoredEvent,
};
use forthwire_lib::io::serial::{list_ports, SerialTransport};
use forthwire_lib::io::sim::SimulatedDevice;
use forthwire_lib::io::Transport;
use forthwire_lib::settings::{self, ArchiveBackendKind, Settings};
use forthwire_lib::tlog;
use forthwire_lib::tui::{Console, ConsoleConfig};
use forthwire_lib::ReplEngine;

/// Commands recalled with Up/Down from earlier sessions
const HISTORY_RECALL: usize = 200;

#[derive(Parser, Debug)]
#[command(name = "forthwire", version, about = "Serial console for FORTH targets")]
struct Args {
    /// Settings file (default: <config dir>/forthwire/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port, overrides the settings file
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate, overrides the settings file
    #[arg(short, long)]
    baud: Option<u32>,

    /// Talk to a built-in simulated device instead of a serial port
    #[arg(long)]
    simulate: bool,

    /// Connect as soon as the console starts
    #[arg(long)]
    connect: bool,

    /// List serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Print the last N archived events and exit
    #[arg(long, value_name = "N")]
    history: Option<usize>,

    /// Do not archive this session
    #[arg(long)]
    no_archive: bool,

    /// Directory for log files, overrides the settings file
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut settings = settings::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        settings.port = port;
    }
    if let Some(baud) = args.baud {
        settings.baud_rate = baud;
    }
    if args.log_dir.is_some() {
        settings.log_dir = args.log_dir;
    }
    if args.no_archive {
        settings.archive.backend = ArchiveBackendKind::None;
    }

    if args.list_ports {
        return print_ports();
    }
    if let Some(count) = args.history {
        return print_history(&settings, count);
    }

    if let Some(dir) = &settings.log_dir {
        forthwire_lib::logging::init_file_logging(dir)?;
    }

    let history = recent_commands(&settings);
    let writer = match open_archive(&settings) {
        Ok(writer) => writer.map(Arc::new),
        Err(e) => {
            tlog!("[main] Archive unavailable, continuing without it: {}", e);
            None
        }
    };

    let (transport, port): (Box<dyn Transport>, String) = if args.simulate {
        (
            Box::new(SimulatedDevice::new().with_banner("forthwire simulated target")),
            "sim".to_string(),
        )
    } else {
        (
            Box::new(SerialTransport::new(settings.serial_options())),
            settings.port.clone(),
        )
    };

    let engine = ReplEngine::new(transport, settings.repl_options());
    if let Some(writer) = &writer {
        engine.add_archivist(writer.clone() as Arc<dyn Archivist>);
    }

    let config = ConsoleConfig {
        port,
        baud_rate: settings.baud_rate,
        poll_interval: settings.poll_interval(),
        scrollback: forthwire_lib::tui::app::DEFAULT_SCROLLBACK,
        archive: writer.as_ref().map(|w| w.backend_name().to_string()),
        history,
        connect_on_start: args.connect || args.simulate,
    };

    let result = Console::new(engine, config).run();

    if let Some(writer) = writer {
        writer.close();
    }
    forthwire_lib::logging::stop_file_logging();

    result.map(|_| ()).map_err(Into::into)
}

fn open_archive(settings: &Settings) -> Result<Option<ArchiveWriter>, Box<dyn std::error::Error>> {
    let writer_settings = settings.writer_settings();
    let archive = &settings.archive;

    let writer = match archive.backend {
        ArchiveBackendKind::None => return Ok(None),
        ArchiveBackendKind::Sqlite => {
            let path = archive.sqlite_path.clone();
            ArchiveWriter::spawn_with(writer_settings, move |_rt| {
                Ok(Box::new(SqliteArchive::open(&path)?) as Box<dyn ArchiveBackend>)
            })?
        }
        ArchiveBackendKind::Rqlite => {
            let host = archive.rqlite_host.clone();
            let port = archive.rqlite_port;
            ArchiveWriter::spawn_with(writer_settings, move |rt| {
                let backend = rt.block_on(RqliteArchive::connect(&host, port))?;
                Ok(Box::new(backend) as Box<dyn ArchiveBackend>)
            })?
        }
    };
    Ok(Some(writer))
}

/// The newest `limit` archived events, oldest first.
fn load_recent(
    settings: &Settings,
    kind: Option<EventKind>,
    limit: usize,
) -> Result<Vec<StoredEvent>, Box<dyn std::error::Error>> {
    let archive = &settings.archive;
    match archive.backend {
        ArchiveBackendKind::None => Ok(Vec::new()),
        ArchiveBackendKind::Sqlite => {
            if !archive.sqlite_path.exists() {
                return Ok(Vec::new());
            }
            Ok(SqliteArchive::open(&archive.sqlite_path)?.recent_events(kind, limit)?)
        }
        ArchiveBackendKind::Rqlite => {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            let events = rt.block_on(async {
                let backend = RqliteArchive::connect(&archive.rqlite_host, archive.rqlite_port).await?;
                backend.recent_events(kind, limit).await
            })?;
            Ok(events)
        }
    }
}

fn recent_commands(settings: &Settings) -> Vec<String> {
    match load_recent(settings, Some(EventKind::UserCommand), HISTORY_RECALL) {
        Ok(events) => events
            .iter()
            .filter_map(|e| e.payload().map(str::to_string))
            .collect(),
        Err(e) => {
            tlog!("[main] Could not load command history: {}", e);
            Vec::new()
        }
    }
}

fn print_history(settings: &Settings, count: usize) -> Result<(), Box<dyn std::error::Error>> {
    for event in load_recent(settings, None, count)? {
        let marker = match event.kind.direction() {
            Some(Direction::Outgoing) => ">",
            Some(Direction::Incoming) => "<",
            Some(Direction::Error) => "!",
            None => "-",
        };
        println!(
            "{}  {} {:<17}  {}",
            event.timestamp,
            marker,
            event.kind.as_str(),
            event.payload().unwrap_or("")
        );
    }
    Ok(())
}

fn print_ports() -> Result<(), Box<dyn std::error::Error>> {
    let ports = list_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        let usb = match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => format!(" [{:04x}:{:04x}]", vid, pid),
            _ => String::new(),
        };
        let description = [port.manufacturer, port.product]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        println!("{}  {}{}  {}", port.port_name, port.port_type, usb, description);
    }
    Ok(())
}
